#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate pe_loader;

use libfuzzer_sys::fuzz_target;
use pe_loader::datasource::{DataSource, MemoryDataSource};
use std::rc::Rc;

fuzz_target!(|data: &[u8]| {
    let source: Rc<dyn DataSource> = Rc::new(MemoryDataSource::new(data.to_vec()));
    let _ = pe_loader::parser::parse_from_file(source, "fuzz-input.exe", ".");
});
