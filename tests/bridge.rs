use bytestream::fs::FileByteStream;
use bytestream::stream::{ByteStream, OpenMode, StreamReader, StreamWriter};
use std::io::{self, BufRead, BufReader, Read, Write};
use tempfile::TempDir;

#[test]
fn writer_and_reader_round_trip_through_std_io() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bridge.xml").to_string_lossy().into_owned();

    let mut file = FileByteStream::new();
    file.open(&path, OpenMode::OUT | OpenMode::TRUNC).unwrap();

    let mut writer = StreamWriter::new(file);
    writeln!(writer, "<package>").unwrap();
    writeln!(writer, "  <metadata/>").unwrap();
    writeln!(writer, "</package>").unwrap();
    writer.flush().unwrap();
    writer.get_mut().close();

    let mut file = FileByteStream::new();
    file.open(&path, OpenMode::IN).unwrap();

    let lines: Vec<String> = BufReader::new(StreamReader::new(file))
        .lines()
        .collect::<io::Result<_>>()
        .unwrap();
    assert_eq!(lines, ["<package>", "  <metadata/>", "</package>"]);
}

#[test]
fn io_copy_between_streams() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.bin");
    let target_path = dir.path().join("target.bin");
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(&source_path, &payload).unwrap();

    let mut source = FileByteStream::new();
    source
        .open(&source_path.to_string_lossy(), OpenMode::IN)
        .unwrap();
    let mut target = FileByteStream::new();
    target
        .open(&target_path.to_string_lossy(), OpenMode::OUT)
        .unwrap();

    let copied = io::copy(
        &mut StreamReader::new(&mut source),
        &mut StreamWriter::new(&mut target),
    )
    .unwrap();
    target.close();

    assert_eq!(copied, payload.len() as u64);
    assert_eq!(std::fs::read(&target_path).unwrap(), payload);
}

#[test]
fn closed_stream_reads_empty_and_refuses_writes() {
    let mut reader = StreamReader::new(FileByteStream::new());
    let mut content = Vec::new();
    assert_eq!(reader.read_to_end(&mut content).unwrap(), 0);

    let mut writer = StreamWriter::new(FileByteStream::new());
    assert_eq!(writer.write(b"").unwrap(), 0);

    let error = writer.write(b"data").unwrap_err();
    assert_eq!(error.kind(), io::ErrorKind::WriteZero);
    assert!(!writer.into_inner().is_open());
}
