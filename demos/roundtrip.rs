use algorithm::buf::BinaryMut;
use qpackparse::{Decoder, Encoder, EncoderConfig, HeaderField, StreamIdentifier};

extern crate qpackparse;

fn main() {
    let mut config = EncoderConfig::new();
    config.set_capacity(4096);
    let encoder = Encoder::with_config(config);
    let decoder = Decoder::new();

    let stream = StreamIdentifier(0);
    let headers = vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", "/"),
        HeaderField::new(":authority", "www.example.com"),
        HeaderField::new("User-Agent", "qpackparse/0.1"),
        HeaderField::sensitive("authorization", "bearer s3cr3t"),
    ];

    let block = encoder.encode_block(stream, headers).unwrap();
    println!("header block {} bytes", block.len());

    // 控制流必须先于头块送达
    while let Some(frame) = encoder.poll_update() {
        let mut frame = frame;
        println!("update frame {} bytes", frame.len());
        decoder.apply_updates(&mut frame).unwrap();
    }

    let mut read = block;
    let fields = decoder.decode_block(stream, &mut read).unwrap();
    for field in &fields {
        println!("{:?}", field);
    }

    let mut acks = BinaryMut::new();
    decoder.write_acks(&mut acks);
    let mut acks = acks.freeze();
    encoder.recv_acks(&mut acks).unwrap();
    println!(
        "inserts = {} acked = {}",
        encoder.inserts(),
        encoder.highest_acknowledged()
    );
}
