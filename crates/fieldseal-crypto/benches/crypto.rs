use fieldseal_core::KeyType;
use fieldseal_crypto::backend::{open_gcm, seal_gcm};
use fieldseal_crypto::{derive_user_key, LocalBoundary, SearchHashEngine};
use secrecy::SecretString;

fn make_text(size: usize) -> Vec<u8> {
    (0..size).map(|i| b'a' + (i % 26) as u8).collect()
}

fn secret() -> SecretString {
    SecretString::from("bench-secret-bench-secret-bench-secret")
}

#[divan::bench]
fn bench_derive_user_key() {
    derive_user_key(
        divan::black_box(&secret()),
        divan::black_box("user-1"),
        KeyType::Primary,
    )
    .unwrap();
}

#[divan::bench(args = [16, 256, 4096])]
fn bench_seal_primary(bencher: divan::Bencher, size: usize) {
    let key = derive_user_key(&secret(), "user-1", KeyType::Primary).unwrap();
    let data = make_text(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            LocalBoundary
                .seal_sync(divan::black_box(&key), divan::black_box(&data))
                .unwrap()
        });
}

#[divan::bench(args = [16, 256, 4096])]
fn bench_seal_fallback(bencher: divan::Bencher, size: usize) {
    let key = derive_user_key(&secret(), "user-1", KeyType::Primary).unwrap();
    let data = make_text(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal_gcm(divan::black_box(&key), divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [16, 256, 4096])]
fn bench_open_fallback(bencher: divan::Bencher, size: usize) {
    let key = derive_user_key(&secret(), "user-1", KeyType::Primary).unwrap();
    let sealed = seal_gcm(&key, &make_text(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| open_gcm(divan::black_box(&key), divan::black_box(&sealed)).unwrap());
}

#[divan::bench]
fn bench_search_hash(bencher: divan::Bencher) {
    let engine = SearchHashEngine::new();
    bencher.bench(|| {
        engine
            .hash(divan::black_box("Q4 Release"), divan::black_box("user-1"))
            .unwrap()
    });
}

fn main() {
    divan::main();
}
