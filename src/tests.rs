//! End-to-end coverage over small, hand-built log byte strings (no `.bbl` fixture corpus
//! ships with this crate), exercising `BlackboxReader`/`MultiSegmentBlackboxReader` the
//! way a consumer would: drive the iterator to completion and inspect `Statistics`.

use crate::{BlackboxReader, BlackboxReaderError, BlackboxRecord, EventFrame, MultiSegmentBlackboxReader};

struct SignedLog2Histogram<const N: usize, const STRICT: bool> {
    neg: [usize; N],
    zero: usize,
    pos: [usize; N],
}

impl<const N: usize, const STRICT: bool> SignedLog2Histogram<N, STRICT> {
    pub fn push(&mut self, v: i64) {
        if v == 0 {
            self.zero += 1;
        } else {
            let is_positive = v.is_positive();
            let v = v.saturating_abs();
            let mut bin = 63usize - v.leading_zeros() as usize;
            if bin >= N {
                if STRICT {
                    panic!("histogram value {v} out of range for {N} buckets");
                } else {
                    bin = N - 1;
                }
            }

            if is_positive {
                self.pos[bin] += 1;
            } else {
                self.neg[N - bin - 1] += 1;
            }
        }
    }
}

impl<const N: usize, const STRICT: bool> Default for SignedLog2Histogram<N, STRICT> {
    fn default() -> Self {
        Self {
            neg: [0usize; N],
            zero: 0,
            pos: [0usize; N],
        }
    }
}

#[test]
fn signed_histogram_works_for_0() {
    let mut histo: SignedLog2Histogram<4, false> = Default::default();
    histo.push(0);

    assert_eq!(histo.zero, 1);
    assert_eq!(histo.neg, [0; 4]);
    assert_eq!(histo.pos, [0; 4]);
}

#[test]
fn signed_histogram_works_for_1() {
    let mut histo: SignedLog2Histogram<4, false> = Default::default();
    histo.push(1);

    assert_eq!(histo.zero, 0);
    assert_eq!(histo.neg, [0; 4]);
    assert_eq!(histo.pos, [1, 0, 0, 0]);
}

#[test]
fn signed_histogram_works_for_second_bucket() {
    let mut histo: SignedLog2Histogram<4, false> = Default::default();
    histo.push(2);
    histo.push(3);

    assert_eq!(histo.zero, 0);
    assert_eq!(histo.neg, [0; 4]);
    assert_eq!(histo.pos, [0, 2, 0, 0]);
}

#[test]
fn signed_histogram_works_for_a_negative_value() {
    let mut histo: SignedLog2Histogram<4, false> = Default::default();
    histo.push(-5);

    assert_eq!(histo.zero, 0);
    assert_eq!(histo.pos, [0; 4]);
    assert_eq!(histo.neg, [0, 1, 0, 0]);
}

#[test]
fn signed_histogram_works_for_the_last_bucket() {
    let mut histo: SignedLog2Histogram<4, false> = Default::default();
    histo.push(i64::MAX);
    histo.push((i64::MAX >> 1) + 1);

    assert_eq!(histo.zero, 0);
    assert_eq!(histo.neg, [0; 4]);
    assert_eq!(histo.pos, [0, 0, 0, 2]);
}

#[test]
#[should_panic]
fn strict_signed_histogram_panics_for_an_out_of_range_bucket() {
    let mut histo: SignedLog2Histogram<4, true> = Default::default();
    histo.push(i64::MAX);
}

#[derive(Default)]
struct LogStats {
    main: usize,
    gnss: usize,
    slow: usize,
    home: usize,
    event: usize,
    garbage: usize,
    remaining_bytes: usize,
    gyro_adc0_histo: SignedLog2Histogram<32, false>,
}

trait BlackboxReaderExt {
    fn consume(&mut self) -> LogStats;
}

impl<'a> BlackboxReaderExt for BlackboxReader<'a> {
    fn consume(&mut self) -> LogStats {
        let mut stats = LogStats::default();
        let gyro_adc0_ix = self.header().ip_fields.get("gyroADC[0]").map(|f| f.ix);

        for record in &mut *self {
            match record {
                BlackboxRecord::Main { columns, .. } => {
                    stats.main += 1;
                    if let Some(ix) = gyro_adc0_ix {
                        stats.gyro_adc0_histo.push(columns[ix]);
                    }
                }
                BlackboxRecord::Gnss { .. } => stats.gnss += 1,
                BlackboxRecord::Slow { .. } => stats.slow += 1,
                BlackboxRecord::Home { .. } => stats.home += 1,
                BlackboxRecord::Event(_) => stats.event += 1,
                BlackboxRecord::Garbage { .. } => stats.garbage += 1,
            }
        }

        stats.remaining_bytes = self.remaining_bytes().len();
        stats
    }
}

trait MultiSegmentBlackboxReaderExt {
    fn consume(&mut self) -> Vec<Result<LogStats, BlackboxReaderError>>;
}

impl<'a> MultiSegmentBlackboxReaderExt for MultiSegmentBlackboxReader<'a> {
    fn consume(&mut self) -> Vec<Result<LogStats, BlackboxReaderError>> {
        self.map(|r| r.map(|mut r| r.consume())).collect()
    }
}

fn push_unsigned_vb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn push_signed_vb(out: &mut Vec<u8>, value: i32) {
    let zigzag = ((value << 1) ^ (value >> 31)) as u32;
    push_unsigned_vb(out, zigzag);
}

/// One `I` frame, one `S` frame, one `H` frame, one `G` frame, a sync-beep `E` frame and
/// an end-of-log `E` frame, each declared with its own trivial field list.
fn synthetic_log() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n");
    data.extend_from_slice(b"H Field I name:loopIteration,time,gyroADC[0]\n");
    data.extend_from_slice(b"H Field I signed:0,0,1\n");
    data.extend_from_slice(b"H Field I predictor:0,0,0\n");
    data.extend_from_slice(b"H Field I encoding:1,1,0\n");
    data.extend_from_slice(b"H Field S name:flightModeFlags\n");
    data.extend_from_slice(b"H Field S signed:0\n");
    data.extend_from_slice(b"H Field S predictor:0\n");
    data.extend_from_slice(b"H Field S encoding:1\n");
    data.extend_from_slice(b"H Field H name:GPS_home[0],GPS_home[1]\n");
    data.extend_from_slice(b"H Field H signed:0,0\n");
    data.extend_from_slice(b"H Field H predictor:0,0\n");
    data.extend_from_slice(b"H Field H encoding:1,1\n");
    data.extend_from_slice(b"H Field G name:GPS_numSat,GPS_coord[0],GPS_coord[1]\n");
    data.extend_from_slice(b"H Field G signed:0,0,0\n");
    data.extend_from_slice(b"H Field G predictor:0,0,0\n");
    data.extend_from_slice(b"H Field G encoding:1,1,1\n");

    data.push(b'I');
    push_unsigned_vb(&mut data, 0); // loopIteration
    push_unsigned_vb(&mut data, 1000); // time
    push_signed_vb(&mut data, -5); // gyroADC[0]

    data.push(b'S');
    push_unsigned_vb(&mut data, 5); // flightModeFlags

    data.push(b'H');
    push_unsigned_vb(&mut data, 100); // GPS_home[0]
    push_unsigned_vb(&mut data, 50); // GPS_home[1]

    data.push(b'G');
    push_unsigned_vb(&mut data, 6); // GPS_numSat
    push_unsigned_vb(&mut data, 10); // GPS_coord[0]
    push_unsigned_vb(&mut data, 20); // GPS_coord[1]

    data.push(b'E');
    data.push(0); // sync beep
    push_unsigned_vb(&mut data, 500);

    data.push(b'E');
    data.push(255); // end of log
    data.extend_from_slice(b"End of log\0");

    data
}

#[test]
fn synthetic_log_decodes_one_of_every_frame_kind() {
    let data = synthetic_log();
    let mut reader = BlackboxReader::from_bytes(&data).unwrap();
    let stats = reader.consume();

    assert_eq!(stats.main, 1);
    assert_eq!(stats.slow, 1);
    assert_eq!(stats.home, 1);
    assert_eq!(stats.gnss, 1);
    assert_eq!(stats.event, 2);
    assert_eq!(stats.garbage, 0);
    assert_eq!(stats.remaining_bytes, 0);
    // gyroADC[0] = -5 falls in bucket 2 (|v|=5, 63 - leading_zeros(5i64) == 2), stored at
    // the mirrored index `N - bin - 1` of the negative half.
    let mut expected_neg = [0usize; 32];
    expected_neg[29] = 1;
    assert_eq!(stats.gyro_adc0_histo.neg, expected_neg);
}

#[test]
fn gnss_frame_is_unreferenced_without_a_preceding_home_frame() {
    let mut data = Vec::new();
    data.extend_from_slice(b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n");
    data.extend_from_slice(b"H Field I name:loopIteration\n");
    data.extend_from_slice(b"H Field I signed:0\n");
    data.extend_from_slice(b"H Field I predictor:0\n");
    data.extend_from_slice(b"H Field I encoding:1\n");
    data.extend_from_slice(b"H Field G name:GPS_numSat\n");
    data.extend_from_slice(b"H Field G signed:0\n");
    data.extend_from_slice(b"H Field G predictor:0\n");
    data.extend_from_slice(b"H Field G encoding:1\n");
    data.push(b'I');
    push_unsigned_vb(&mut data, 0);
    data.push(b'G');
    push_unsigned_vb(&mut data, 6);

    let mut reader = BlackboxReader::from_bytes(&data).unwrap();
    reader.next(); // I frame
    match reader.next().unwrap() {
        BlackboxRecord::Gnss { unreferenced, .. } => assert!(unreferenced),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn multi_segment_reader_consumes_each_session_independently() {
    let mut data = synthetic_log();
    data.extend_from_slice(&synthetic_log());
    let mut reader = MultiSegmentBlackboxReader::from_bytes(&data);
    let results = reader.consume();
    assert_eq!(results.len(), 2);
    for result in results {
        let stats = result.unwrap();
        assert_eq!(stats.main, 1);
        assert_eq!(stats.gnss, 1);
    }
}

#[test]
fn corrupt_byte_before_a_valid_header_is_rejected_as_no_session() {
    let err = BlackboxReader::from_bytes(b"garbage").unwrap_err();
    assert_eq!(err, BlackboxReaderError::NoSession);
}

#[test]
fn end_of_log_event_frame_is_reachable_through_the_reader() {
    let data = synthetic_log();
    let mut reader = BlackboxReader::from_bytes(&data).unwrap();
    let mut saw_end_of_log = false;
    for record in &mut reader {
        if let BlackboxRecord::Event(EventFrame::EndOfLog) = record {
            saw_end_of_log = true;
        }
    }
    assert!(saw_end_of_log);
}
