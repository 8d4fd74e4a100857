//! Fuzz target for the template scanner
//!
//! Feeds arbitrary UTF-8 to the scanner looking for panics, lost input and
//! malformed spans.
//!
//! Run with: cargo +nightly fuzz run lexer_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use quarry_sql::{Lexer, TokenKind};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let tokens = Lexer::new(input).tokenize();

        assert!(!tokens.is_empty(), "Tokenization should produce at least Eof");
        assert_eq!(
            tokens.last().map(|t| &t.kind),
            Some(&TokenKind::Eof),
            "Last token should always be Eof"
        );

        // Spans tile the input in order.
        let mut offset = 0;
        for token in &tokens {
            assert_eq!(token.span.start, offset, "Spans should be contiguous");
            assert!(token.span.start <= token.span.end, "Span start should be <= end");
            offset = token.span.end;
        }
        assert_eq!(offset, input.len(), "Spans should cover the whole input");
    }
});
