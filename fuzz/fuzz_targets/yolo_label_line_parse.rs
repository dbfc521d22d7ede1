//! Fuzz target for single-line YOLO label parsing.
//!
//! Feeds arbitrary UTF-8 lines to the label line parser used when staged
//! label files are read back for splitting.

#![no_main]

use libfuzzer_sys::fuzz_target;
use yololabel::label::fuzz_parse_label_line;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_label_line(line);
});
