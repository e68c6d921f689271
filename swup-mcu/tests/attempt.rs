//! Full update attempts driven through the GATT entry point, the way a BLE stack would.

use swup_mcu::{
    Attribute, GattEvent, MemoryWriter, Phase, RecordingNotifier, SessionConfig, UpdateSession,
};
use swup_proto::{crc::checksum, encode_u32, RESULT_CRC_MISMATCH, RESULT_OK};

fn write(attribute: Attribute, data: &[u8]) -> GattEvent<'_> {
    GattEvent::Write { attribute, data }
}

fn read_size(session: &mut UpdateSession<MemoryWriter, RecordingNotifier>) -> u32 {
    let value = session
        .handle(GattEvent::Read {
            attribute: Attribute::TotalSize,
        })
        .unwrap()
        .unwrap();
    swup_proto::decode_u32(&value).unwrap()
}

#[test]
fn two_chunks_of_0xaa_commit_successfully() {
    let mut session = UpdateSession::new(
        MemoryWriter::new(4096),
        RecordingNotifier::default(),
        SessionConfig::default(),
    );

    session.handle(write(Attribute::TotalSize, &encode_u32(1024))).unwrap();
    assert_eq!(read_size(&mut session), 1024);

    let chunk = [0xaa; 512];
    session.handle(write(Attribute::Data, &chunk)).unwrap();
    session.handle(write(Attribute::Data, &chunk)).unwrap();

    let crc = checksum(&[0xaa; 1024]);
    session.handle(write(Attribute::Checksum, &encode_u32(crc))).unwrap();

    assert_eq!(
        session
            .handle(GattEvent::Read {
                attribute: Attribute::Result,
            })
            .unwrap(),
        Some(vec![RESULT_OK])
    );
    assert_eq!(session.notifier().sent, vec![(Attribute::Result, vec![RESULT_OK])]);
    assert_eq!(session.writer().end_calls, 1);
    assert_eq!(session.writer().finalized().map(|i| i.len()), Some(1024));
}

#[test]
fn wrong_checksum_reports_mismatch_and_keeps_storage_untouched() {
    let mut session = UpdateSession::new(
        MemoryWriter::new(4096),
        RecordingNotifier::default(),
        SessionConfig::default(),
    );

    session.handle(write(Attribute::TotalSize, &encode_u32(10))).unwrap();
    session.handle(write(Attribute::Data, b"0123456789")).unwrap();
    let wrong = checksum(b"0123456789") ^ 1;
    session.handle(write(Attribute::Checksum, &encode_u32(wrong))).unwrap();

    assert_eq!(session.last_result(), Some(RESULT_CRC_MISMATCH));
    assert_eq!(
        session.notifier().sent,
        vec![(Attribute::Result, vec![RESULT_CRC_MISMATCH])]
    );
    assert_eq!(session.writer().end_calls, 0);
    assert_eq!(session.writer().finalized(), None);
}

#[test]
fn refused_size_reads_back_zero() {
    let mut session = UpdateSession::new(
        MemoryWriter::new(100),
        RecordingNotifier::default(),
        SessionConfig::default(),
    );

    session.handle(write(Attribute::TotalSize, &encode_u32(0))).unwrap();
    assert_eq!(read_size(&mut session), 0);

    session.handle(write(Attribute::TotalSize, &encode_u32(101))).unwrap();
    assert_eq!(read_size(&mut session), 0);
    assert_eq!(session.phase(), Phase::Idle);
}

#[test]
fn client_can_retry_after_a_failed_attempt() {
    let mut session = UpdateSession::new(
        MemoryWriter::new(4096).with_magic(0xe9),
        RecordingNotifier::default(),
        SessionConfig::default(),
    );
    let image: Vec<u8> = std::iter::once(0xe9).chain((1..700u32).map(|i| i as u8)).collect();

    // first attempt: one chunk lost in transit
    session.handle(write(Attribute::TotalSize, &encode_u32(image.len() as u32))).unwrap();
    session.handle(write(Attribute::Data, &image[..512])).unwrap();
    session
        .handle(write(Attribute::Checksum, &encode_u32(checksum(&image))))
        .unwrap();
    assert_eq!(session.last_result(), Some(RESULT_CRC_MISMATCH));

    // second attempt from scratch
    session.handle(write(Attribute::TotalSize, &encode_u32(image.len() as u32))).unwrap();
    assert_eq!(session.last_result(), None);
    for chunk in image.chunks(200) {
        session.handle(write(Attribute::Data, chunk)).unwrap();
    }
    session
        .handle(write(Attribute::Checksum, &encode_u32(checksum(&image))))
        .unwrap();

    assert_eq!(session.last_result(), Some(RESULT_OK));
    assert_eq!(session.writer().finalized(), Some(&image[..]));
    assert_eq!(session.notifier().sent.len(), 2);
}

#[test]
fn result_read_after_new_announce_is_empty_while_last_notification_was_ok() {
    let mut session = UpdateSession::new(
        MemoryWriter::new(4096),
        RecordingNotifier::default(),
        SessionConfig::default(),
    );
    let result = GattEvent::Read {
        attribute: Attribute::Result,
    };

    session.handle(write(Attribute::TotalSize, &encode_u32(3))).unwrap();
    session.handle(write(Attribute::Data, b"abc")).unwrap();
    session
        .handle(write(Attribute::Checksum, &encode_u32(checksum(b"abc"))))
        .unwrap();
    assert_eq!(session.handle(result), Ok(Some(vec![RESULT_OK])));

    // next attempt announced but not committed
    session.handle(write(Attribute::TotalSize, &encode_u32(8))).unwrap();
    session.handle(write(Attribute::Data, b"defg")).unwrap();

    // the pushed value still says OK, only a read through the session sees the reset
    assert_eq!(session.notifier().sent, vec![(Attribute::Result, vec![RESULT_OK])]);
    assert_eq!(session.handle(result), Ok(Some(vec![])));
    assert_eq!(session.last_result(), None);
}
