#![no_main]

use fleetwatch_detection::LogParser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parser = LogParser::new();
    let line = String::from_utf8_lossy(data);

    // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
    let _ = parser.parse_line(&line, 2024);
});
