//! Framer Tests
//!
//! Tests for incremental command framing: whole and split arrays, inline
//! commands, pipelining and error recovery.

use tidekv::protocol::{encode_command, CommandName, Framer, FramerState, ParsedCommand};
use tidekv::TideError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Feed `input` in `chunk`-sized pieces, collecting every completed command
fn frame_in_chunks(input: &[u8], chunk: usize) -> Vec<ParsedCommand> {
    let mut framer = Framer::new();
    let mut commands = Vec::new();

    for piece in input.chunks(chunk) {
        let mut ready = framer.feed(piece).unwrap();
        while ready {
            commands.push(framer.take_command().unwrap());
            ready = framer.feed(&[]).unwrap();
        }
    }
    commands
}

fn args(command: &ParsedCommand) -> Vec<&str> {
    command.args.iter().map(String::as_str).collect()
}

// =============================================================================
// Array Framing Tests
// =============================================================================

#[test]
fn test_whole_array() {
    let mut framer = Framer::new();
    let input = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";

    assert!(framer.feed(input).unwrap());
    assert_eq!(framer.state(), FramerState::Complete);

    let command = framer.take_command().unwrap();
    assert_eq!(command.name, CommandName::Set);
    assert_eq!(args(&command), vec!["foo", "bar"]);
    assert_eq!(&command.raw[..], &input[..]);
    assert_eq!(framer.state(), FramerState::Idle);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn test_command_name_is_case_insensitive() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"*1\r\n$4\r\npInG\r\n").unwrap());
    assert_eq!(framer.take_command().unwrap().name, CommandName::Ping);
}

#[test]
fn test_split_at_every_byte_matches_whole() {
    let input = encode_command(&["XADD", "stream", "0-1", "temperature", "36"]);

    let whole = frame_in_chunks(&input, input.len());
    for chunk in 1..input.len() {
        let split = frame_in_chunks(&input, chunk);
        assert_eq!(split, whole, "chunk size {}", chunk);
    }
    assert_eq!(whole.len(), 1);
    assert_eq!(whole[0].name, CommandName::XAdd);
}

#[test]
fn test_incomplete_array_waits() {
    let mut framer = Framer::new();

    assert!(!framer.feed(b"*2\r\n$4\r\nECHO\r\n$5\r\nhel").unwrap());
    assert_ne!(framer.state(), FramerState::Complete);
    assert!(framer.take_command().is_none());

    assert!(framer.feed(b"lo\r\n").unwrap());
    let command = framer.take_command().unwrap();
    assert_eq!(command.name, CommandName::Echo);
    assert_eq!(args(&command), vec!["hello"]);
}

#[test]
fn test_bulk_value_may_contain_crlf() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"*2\r\n$4\r\nECHO\r\n$4\r\na\r\nb\r\n").unwrap());
    assert_eq!(args(&framer.take_command().unwrap()), vec!["a\r\nb"]);
}

#[test]
fn test_pipelined_commands_keep_order() {
    let mut input = encode_command(&["SET", "a", "1"]);
    input.extend(encode_command(&["INCR", "a"]));
    input.extend(encode_command(&["GET", "a"]));

    for chunk in [1, 5, input.len()] {
        let commands = frame_in_chunks(&input, chunk);
        let names: Vec<CommandName> = commands.iter().map(|c| c.name).collect();
        assert_eq!(names, vec![CommandName::Set, CommandName::Incr, CommandName::Get]);
    }
}

#[test]
fn test_raw_bytes_are_per_command() {
    let first = encode_command(&["SET", "k", "v"]);
    let second = encode_command(&["PING"]);
    let mut input = first.clone();
    input.extend(&second);

    let commands = frame_in_chunks(&input, 7);
    assert_eq!(&commands[0].raw[..], &first[..]);
    assert_eq!(&commands[1].raw[..], &second[..]);
}

// =============================================================================
// Inline Command Tests
// =============================================================================

#[test]
fn test_inline_command() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"ECHO hi there\r\n").unwrap());

    let command = framer.take_command().unwrap();
    assert_eq!(command.name, CommandName::Echo);
    assert_eq!(args(&command), vec!["hi", "there"]);
}

#[test]
fn test_inline_command_with_bare_newline() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"PING\n").unwrap());
    assert_eq!(framer.take_command().unwrap().name, CommandName::Ping);
}

#[test]
fn test_blank_lines_are_skipped() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"\r\n\r\nPING\r\n").unwrap());
    assert_eq!(framer.take_command().unwrap().name, CommandName::Ping);
    assert_eq!(framer.buffered(), 0);
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_unknown_command_is_rejected() {
    let mut framer = Framer::new();
    let err = framer.feed(b"*1\r\n$5\r\nHELLO\r\n").unwrap_err();

    assert!(matches!(err, TideError::UnknownCommand(ref name) if name == "HELLO"));
    assert_eq!(framer.state(), FramerState::Idle);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn test_unknown_command_split_across_reads_fails_once() {
    let mut framer = Framer::new();
    let mut errors = 0;
    let mut commands = Vec::new();

    for piece in [&b"*2\r\n$3\r\nFOO\r\n"[..], b"$3\r\nbar\r\n", b"*1\r\n$4\r\nPING\r\n"] {
        let mut result = framer.feed(piece);
        loop {
            match result {
                Ok(true) => commands.push(framer.take_command().unwrap()),
                Ok(false) => break,
                Err(TideError::UnknownCommand(name)) => {
                    assert_eq!(name, "FOO");
                    errors += 1;
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
            result = framer.feed(&[]);
        }
    }

    assert_eq!(errors, 1);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name, CommandName::Ping);
}

#[test]
fn test_unknown_command_keeps_pipelined_commands() {
    let mut input = encode_command(&["NOPE", "x"]);
    input.extend(encode_command(&["ECHO", "after"]));

    let mut framer = Framer::new();
    assert!(matches!(
        framer.feed(&input),
        Err(TideError::UnknownCommand(ref name)) if name == "NOPE"
    ));
    assert!(framer.feed(&[]).unwrap());

    let command = framer.take_command().unwrap();
    assert_eq!(command.name, CommandName::Echo);
    assert_eq!(args(&command), vec!["after"]);
}

#[test]
fn test_unknown_inline_command_is_consumed() {
    let mut framer = Framer::new();
    assert!(matches!(
        framer.feed(b"HELLO there\r\nPING\r\n"),
        Err(TideError::UnknownCommand(_))
    ));
    assert!(framer.feed(&[]).unwrap());
    assert_eq!(framer.take_command().unwrap().name, CommandName::Ping);
}

#[test]
fn test_malformed_length_is_rejected() {
    let mut framer = Framer::new();
    assert!(matches!(
        framer.feed(b"*x\r\n").unwrap_err(),
        TideError::Protocol(_)
    ));

    let mut framer = Framer::new();
    assert!(matches!(
        framer.feed(b"*1\r\n$abc\r\n").unwrap_err(),
        TideError::Protocol(_)
    ));
}

#[test]
fn test_bulk_longer_than_declared_is_rejected() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"*1\r\n$4\r\nPINGX\r\n").is_err());
}

#[test]
fn test_empty_array_is_rejected() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"*0\r\n").is_err());
}

#[test]
fn test_failed_framer_requires_reset() {
    let mut framer = Framer::new();
    assert!(framer.feed(b"*1\r\n$x\r\n").is_err());
    assert_eq!(framer.state(), FramerState::Failed);

    // still failed, even for valid input
    assert!(framer.feed(b"*1\r\n$4\r\nPING\r\n").is_err());

    framer.reset();
    assert_eq!(framer.state(), FramerState::Idle);
    assert_eq!(framer.buffered(), 0);

    assert!(framer.feed(b"*1\r\n$4\r\nPING\r\n").unwrap());
    assert_eq!(framer.take_command().unwrap().name, CommandName::Ping);
}
