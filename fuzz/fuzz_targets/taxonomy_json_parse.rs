//! Fuzz target for label taxonomy JSON parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use yololabel::label::LabelTaxonomy;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(taxonomy) = LabelTaxonomy::from_json_str(json) {
        let _ = taxonomy.next_class_id();
    }
});
