#![no_main]

use std::io::{BufReader, Cursor};

use libfuzzer_sys::fuzz_target;

use proxycache::proxy::codec::{drain_headers, read_line_limited};
use proxycache::proxy::request::{parse_request_line, parse_target};

fuzz_target!(|data: &[u8]| {
    let mut reader = BufReader::new(Cursor::new(data));
    let Ok(Some(line)) = read_line_limited(&mut reader, 8192) else {
        return;
    };
    let _ = drain_headers(&mut reader, 8192);

    if let Ok(request) = parse_request_line(&line) {
        if let Ok(target) = parse_target(&request.target) {
            assert!(!target.host.is_empty());
            assert!(target.path.starts_with('/'));
            assert!(target.port.parse::<u16>().is_ok());
        }
    }
});
