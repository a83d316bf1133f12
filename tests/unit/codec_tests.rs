//! Unit tests for line framing: `PortCodec`, `LineFrames`, `LineBuffer` and
//! `split_lines`.
//!
//! Covers:
//! - single and batched lines
//! - partial delivery buffered until the terminator
//! - overlong and non-UTF-8 lines reported as decode errors, then recovery
//! - the chunking invariant: any split of a byte stream yields the same lines

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use termbox_bridge::port::codec::{LineFrames, PortCodec, DEFAULT_MAX_LINE_BYTES};
use termbox_bridge::port::line_buffer::{split_lines, LineBuffer};
use termbox_bridge::AppError;

// ── PortCodec ────────────────────────────────────────────────────────────────

/// A complete line is returned without its terminator.
#[test]
fn single_line_decodes_without_terminator() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from("OK_WIDTH 80\n");

    let line = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(line, Some("OK_WIDTH 80".to_owned()));
    assert!(buf.is_empty(), "the whole line must be consumed");
}

/// Two lines in one buffer come out one per `decode` call.
#[test]
fn batched_lines_are_each_decoded() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from("OK\nEVENT 2 0 0 0 100 40 0 0\n");

    assert_eq!(codec.decode(&mut buf), Ok(Some("OK".to_owned())));
    assert_eq!(
        codec.decode(&mut buf),
        Ok(Some("EVENT 2 0 0 0 100 40 0 0".to_owned()))
    );
    assert_eq!(codec.decode(&mut buf), Ok(None));
}

/// A partial line stays buffered until its newline arrives.
#[test]
fn partial_line_waits_for_terminator() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from("OK_HEI");

    assert_eq!(codec.decode(&mut buf), Ok(None));

    buf.extend_from_slice(b"GHT 24\n");
    assert_eq!(codec.decode(&mut buf), Ok(Some("OK_HEIGHT 24".to_owned())));
}

/// An empty line decodes to an empty string; filtering is the caller's job.
#[test]
fn empty_line_decodes_to_empty_string() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from("\n");

    assert_eq!(codec.decode(&mut buf), Ok(Some(String::new())));
}

/// Lines beyond the cap produce a `line too long` decode error.
#[test]
fn line_over_cap_is_rejected() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from(format!("{}\n", "x".repeat(DEFAULT_MAX_LINE_BYTES + 1)).as_str());

    let err = codec.decode(&mut buf).expect_err("overlong line must fail");

    match err {
        AppError::Decode(msg) => assert!(
            msg.contains("line too long"),
            "error must mention the cap, got: {msg}"
        ),
        other => panic!("expected AppError::Decode, got: {other:?}"),
    }
}

/// Invalid UTF-8 is a decode error and does not poison later lines.
#[test]
fn invalid_utf8_is_a_decode_error_then_recovers() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe\nOK\n"[..]);

    assert!(matches!(codec.decode(&mut buf), Err(AppError::Decode(_))));
    assert_eq!(codec.decode(&mut buf), Ok(Some("OK".to_owned())));
}

/// `decode_eof` yields a final unterminated line.
#[test]
fn decode_eof_flushes_unterminated_line() {
    let mut codec = PortCodec::new();
    let mut buf = BytesMut::from("OK");

    assert_eq!(codec.decode_eof(&mut buf), Ok(Some("OK".to_owned())));
}

/// Encoding appends exactly one newline.
#[test]
fn encode_writes_line_and_newline() {
    let mut codec = PortCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode("get_cell 3 4", &mut dst)
        .expect("encode must succeed");
    codec.encode(String::from("present"), &mut dst).expect("encode must succeed");

    assert_eq!(&dst[..], b"get_cell 3 4\npresent\n");
}

// ── LineBuffer ───────────────────────────────────────────────────────────────

/// Lines completed by a chunk are drained; the tail stays buffered.
#[test]
fn line_buffer_keeps_partial_tail() {
    let mut buffer = LineBuffer::new(DEFAULT_MAX_LINE_BYTES);

    let lines = buffer
        .extend(b"OK\nOK_WIDTH 8")
        .expect("extend must succeed");
    assert_eq!(lines, vec!["OK".to_owned()]);
    assert_eq!(buffer.remainder(), b"OK_WIDTH 8");
    assert!(!buffer.is_empty());

    let lines = buffer.extend(b"0\n").expect("extend must succeed");
    assert_eq!(lines, vec!["OK_WIDTH 80".to_owned()]);
    assert!(buffer.is_empty());
}

/// A seeded remainder is treated as the start of the stream.
#[test]
fn line_buffer_with_remainder_prepends_bytes() {
    let mut buffer = LineBuffer::with_remainder(b"EVENT 1 0 0 97", DEFAULT_MAX_LINE_BYTES);

    let lines = buffer
        .extend(b" 0 0 0 0\n")
        .expect("extend must succeed");

    assert_eq!(lines, vec!["EVENT 1 0 0 97 0 0 0 0".to_owned()]);
}

/// After an overlong line the buffer resumes at the next line.
#[test]
fn line_buffer_recovers_after_overlong_line() {
    let mut buffer = LineBuffer::new(64);
    buffer.push("y".repeat(100).as_bytes());
    buffer.push(b"\nOK\n");

    assert!(matches!(buffer.next_line(), Err(AppError::Decode(_))));
    assert_eq!(buffer.next_line(), Ok(Some("OK".to_owned())));
    assert_eq!(buffer.next_line(), Ok(None));
}

/// `into_remainder` hands back unprocessed bytes unchanged.
#[test]
fn into_remainder_returns_unprocessed_bytes() {
    let mut buffer = LineBuffer::new(DEFAULT_MAX_LINE_BYTES);
    buffer.push(b"OK /tmp/a.sock\nstray");

    assert_eq!(
        buffer.next_line(),
        Ok(Some("OK /tmp/a.sock".to_owned()))
    );
    assert_eq!(&buffer.into_remainder()[..], b"stray");
}

/// `next_line` keeps the good lines on both sides of a non-UTF-8 line.
#[test]
fn next_line_keeps_good_lines_around_invalid_utf8() {
    let mut buffer = LineBuffer::new(DEFAULT_MAX_LINE_BYTES);
    buffer.push(b"OK\n\xff\xfe\nOK_WIDTH 80\n");

    assert_eq!(buffer.next_line(), Ok(Some("OK".to_owned())));
    assert!(matches!(buffer.next_line(), Err(AppError::Decode(_))));
    assert_eq!(buffer.next_line(), Ok(Some("OK_WIDTH 80".to_owned())));
}

/// `split_lines` fails the whole call on a non-UTF-8 line, including the
/// lines decoded before it.
#[test]
fn split_lines_fails_whole_chunk_on_invalid_utf8() {
    let result = split_lines(b"", b"OK\n\xff\nOK_HEIGHT 24\n");

    assert!(matches!(result, Err(AppError::Decode(_))), "got {result:?}");
}

// ── LineFrames ───────────────────────────────────────────────────────────────

/// A bad line is one stream item; the lines buffered behind it still arrive
/// without further reads.
#[tokio::test]
async fn line_frames_stream_past_bad_lines() {
    let mut input = "x".repeat(100).into_bytes();
    input.extend_from_slice(b"\nOK\n\xff\nOK_WIDTH 80\ntail");
    let mut framed = FramedRead::new(&input[..], LineFrames::new(64));

    let mut items = Vec::new();
    while let Some(item) = framed.next().await {
        items.push(item.expect("no i/o error from a byte slice"));
    }

    assert_eq!(items.len(), 4, "tail is dropped at EOF: {items:?}");
    match &items[0] {
        Err(AppError::Decode(msg)) => assert!(msg.contains("line too long"), "got: {msg}"),
        other => panic!("expected an overlong line, got {other:?}"),
    }
    assert_eq!(items[1], Ok("OK".to_owned()));
    assert!(matches!(items[2], Err(AppError::Decode(_))));
    assert_eq!(items[3], Ok("OK_WIDTH 80".to_owned()));
}

/// With `keeping_tail`, the unterminated end of the stream is the last item.
#[tokio::test]
async fn line_frames_keeping_tail_yields_final_line() {
    let mut framed = FramedRead::new(&b"one\ntwo"[..], LineFrames::keeping_tail(64));

    assert_eq!(framed.next().await, Some(Ok(Ok("one".to_owned()))));
    assert_eq!(framed.next().await, Some(Ok(Ok("two".to_owned()))));
    assert_eq!(framed.next().await, None);
}

// ── split_lines chunking invariant ───────────────────────────────────────────

/// Feed `stream` through `split_lines` in pieces cut at `cuts`.
fn split_at(stream: &[u8], cuts: &[usize]) -> (Vec<String>, Vec<u8>) {
    let mut lines = Vec::new();
    let mut remainder = BytesMut::new();
    let mut start = 0;
    for &cut in cuts.iter().chain(std::iter::once(&stream.len())) {
        let (mut batch, rest) =
            split_lines(&remainder, &stream[start..cut]).expect("split must succeed");
        lines.append(&mut batch);
        remainder = rest;
        start = cut;
    }
    (lines, remainder.to_vec())
}

/// Every way of cutting a stream into two or three chunks yields the same
/// lines and remainder as delivering it whole.
#[test]
fn chunking_never_changes_the_lines() {
    let stream: &[u8] = concat!(
        "OK /tmp/termbox_port_1.sock\n",
        "EVENT 2 0 0 0 80 24 0 0\n",
        "OK\r\nOK_CELL 3 4 a 1 0\npartial",
    )
    .as_bytes();
    let expected = split_at(stream, &[]);

    assert_eq!(
        expected.0,
        vec![
            "OK /tmp/termbox_port_1.sock".to_owned(),
            "EVENT 2 0 0 0 80 24 0 0".to_owned(),
            "OK".to_owned(),
            "OK_CELL 3 4 a 1 0".to_owned(),
        ]
    );
    assert_eq!(expected.1, b"partial".to_vec());

    for first in 0..=stream.len() {
        assert_eq!(split_at(stream, &[first]), expected, "cut at {first}");
        for second in first..=stream.len() {
            assert_eq!(
                split_at(stream, &[first, second]),
                expected,
                "cuts at {first} and {second}"
            );
        }
    }
}

/// Byte-at-a-time delivery yields the same lines.
#[test]
fn byte_at_a_time_delivery_matches_whole_delivery() {
    let stream = b"OK_WIDTH 80\nOK_HEIGHT 24\nEVENT 1 0 0 120 0 0 0 0\n";
    let cuts: Vec<usize> = (1..stream.len()).collect();

    assert_eq!(split_at(stream, &cuts), split_at(stream, &[]));
}

/// A chunk without any terminator becomes the new remainder wholesale.
#[test]
fn chunk_without_terminator_extends_remainder() {
    let (lines, rest) = split_lines(b"OK_W", b"IDTH").expect("split must succeed");

    assert!(lines.is_empty());
    assert_eq!(&rest[..], b"OK_WIDTH");
}
