use super::*;

#[test]
fn write_read() {
    let path = "test.mimg";

    let mut image = BinaryImage::new();
    image.text = vec![0x2128_0005, 0x0000_000c];
    image.data = vec![0, 0, 0, 100, 0, 0, 0, 200];
    image.kdata = vec![1, 2, 3];

    write_file(path, &image).unwrap();

    let read_back = read_file(path).unwrap();

    assert_eq!(read_back.text_base, image.text_base);
    assert_eq!(read_back.text, image.text);
    assert_eq!(read_back.data_base, image.data_base);
    assert_eq!(read_back.data, image.data);
    assert_eq!(read_back.ktext, image.ktext);
    assert_eq!(read_back.kdata, image.kdata);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn big_endian_container() {
    let mut image = BinaryImage::new();
    image.text = vec![0x0000_000c];

    let mut buffer = Vec::new();
    write(&mut buffer, &image).unwrap();

    // text base, count, the single word.
    assert_eq!(
        &buffer[..12],
        &[0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0c]
    );
}

#[test]
fn classify_addresses() {
    let mut image = BinaryImage::new();
    image.text = vec![0; 4];
    image.data = vec![0; 16];

    assert_eq!(image.classify(0x0040_0000), Some(Segment::Text));
    assert_eq!(image.classify(0x0040_000c), Some(Segment::Text));
    assert_eq!(image.classify(0x0040_0010), None);
    assert_eq!(image.classify(0x1001_000f), Some(Segment::Data));
    assert_eq!(image.classify(0x2000_0000), None);
}
