use cncstream_communication::grbl::{classify, parse_probe_z};
use cncstream_communication::{LineBuffer, ResponseClass};
use proptest::collection;
use proptest::prelude::*;

proptest! {
    /// Lines come back intact however the bytes are split across reads
    #[test]
    fn test_line_buffer_reassembles_any_chunking(
        lines in collection::vec("[ -~]{0,30}", 1..20),
        cuts in collection::vec(1usize..8, 1..50),
    ) {
        let wire: Vec<u8> = lines.iter().flat_map(|l| format!("{}\r\n", l).into_bytes()).collect();

        let mut buffer = LineBuffer::new();
        let mut received = Vec::new();
        let mut offset = 0;
        for cut in cuts.iter().cycle() {
            if offset >= wire.len() {
                break;
            }
            let end = (offset + cut).min(wire.len());
            buffer.push(&wire[offset..end]);
            offset = end;
            while let Some(line) = buffer.next_line() {
                received.push(String::from_utf8(line).unwrap());
            }
        }

        prop_assert_eq!(received, lines);
        prop_assert!(buffer.is_empty());
    }

    /// Arbitrary controller output never panics the classifier
    #[test]
    fn test_classify_accepts_any_text(line in "\\PC{0,40}") {
        let _ = classify(&line);
        let _ = parse_probe_z(&line);
    }

    /// Probe heights survive the report format GRBL uses
    #[test]
    fn test_probe_report_height(z in -500.0f64..500.0) {
        let line = format!("[PRB:0.000,0.000,{:.3}:1]", z);
        let parsed = parse_probe_z(&line).unwrap();
        prop_assert!((parsed - z).abs() < 0.001);
        prop_assert!(matches!(classify(&line), ResponseClass::ProbeReport(Some(_))));
    }
}
