//! Fuzz target for update schedule parsing.
//!
//! This tests that schedule parsing never panics on arbitrary input
//! and that anything it accepts displays back to an equal window.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_topology::ScheduleWindow;

fuzz_target!(|data: &str| {
    // Should never panic
    let Ok(window) = ScheduleWindow::parse(data) else {
        return;
    };

    // Canonical form parses to the same window
    let canonical = window.to_string();
    let reparsed = ScheduleWindow::parse(&canonical).expect("canonical form must parse");
    assert_eq!(reparsed, window);
    assert_eq!(reparsed.to_string(), canonical);
});
