use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use chat_relay::stream::{decode_line, LineReassembler, NormalizedEvent};

fn upstream_body(messages: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(messages * 120);
    body.extend_from_slice(b"event: ping\n\n");
    for index in 0..messages {
        body.extend_from_slice(
            format!(
                "data: {{\"event\":\"message\",\"task_id\":\"t-1\",\"message_id\":\"m-1\",\"conversation_id\":\"c-1\",\"answer\":\"token {index} 你好\"}}\n\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(b"data: {\"event\":\"message_end\",\"conversation_id\":\"c-1\"}\n\n");
    body
}

fn relay_chunks(body: &[u8], chunk_bytes: usize) -> usize {
    let mut reassembler = LineReassembler::new();
    let mut lines = Vec::with_capacity(16);
    let mut frames = 0;
    for chunk in body.chunks(chunk_bytes) {
        reassembler.feed_into(chunk, &mut lines);
        for line in lines.drain(..) {
            if let Some(event) = decode_line(&line) {
                frames += event.to_sse_frame().len();
            }
        }
    }
    if let Some(tail) = reassembler.flush() {
        if let Some(event) = decode_line(&tail) {
            frames += event.to_sse_frame().len();
        }
    }
    frames
}

fn bench_reassemble_decode(c: &mut Criterion) {
    let body = upstream_body(256);
    let mut group = c.benchmark_group("relay_pipeline");
    group.throughput(Throughput::Bytes(body.len() as u64));
    for chunk_bytes in [7_usize, 64, 1024, 16 * 1024] {
        group.bench_function(format!("reassemble_decode_encode_chunk_{chunk_bytes}"), |b| {
            b.iter(|| relay_chunks(black_box(&body), chunk_bytes));
        });
    }
    group.finish();
}

fn bench_frame_encoding(c: &mut Criterion) {
    let plain = NormalizedEvent::Message {
        answer: "plain ascii token".to_string(),
    };
    let escaped = NormalizedEvent::Message {
        answer: "line\n\"quoted\" \\ 😀".to_string(),
    };

    c.bench_function("frame_encode_plain", |b| {
        b.iter(|| black_box(&plain).to_sse_frame());
    });
    c.bench_function("frame_encode_escaped", |b| {
        b.iter(|| black_box(&escaped).to_sse_frame());
    });
    c.bench_function("frame_encode_serde_json_baseline", |b| {
        b.iter(|| serde_json::to_string(black_box(&escaped)));
    });
}

criterion_group!(benches, bench_reassemble_decode, bench_frame_encoding);
criterion_main!(benches);
