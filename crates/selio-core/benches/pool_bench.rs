use criterion::{criterion_group, criterion_main, Criterion};

use selio_core::{ByteBufferPool, ByteChannel};

fn bench_pool_borrow_recycle(c: &mut Criterion) {
    let pool = ByteBufferPool::new(64).unwrap();
    c.bench_function("pool_borrow_recycle", |b| {
        b.iter(|| {
            let buf = pool.borrow();
            pool.recycle(buf);
        })
    });
}

fn bench_channel_write_read(c: &mut Criterion) {
    let channel = ByteChannel::new(64 * 1024);
    let payload = [0u8; 1024];
    let mut sink = [0u8; 1024];
    c.bench_function("channel_write_read_1k", |b| {
        b.iter(|| {
            channel.write_fully(&payload).unwrap();
            let mut read = 0;
            while read < payload.len() {
                read += channel.read_available(&mut sink).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_pool_borrow_recycle, bench_channel_write_read);
criterion_main!(benches);
