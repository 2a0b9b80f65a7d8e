//! Benchmarks for the class transformer.
//!
//! Measures the per-class cost the load-time hook adds:
//! - parsing and re-serializing an untouched class
//! - scanning a class with no monitored calls
//! - rewriting a class with many `Thread.start()` call sites

extern crate threadscope;

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use threadscope::{bytecode::opcodes, prelude::*};

const THREAD: &str = "java/lang/Thread";

fn thread_source() -> MemorySource {
    let mut thread = ClassBuilder::new(THREAD, "java/lang/Object");
    thread
        .abstract_method(0x0001, "start", "()V")
        .abstract_method(0x0011, "join", "()V")
        .abstract_method(0x0001, "run", "()V");

    let mut source = MemorySource::new();
    source.insert(THREAD, thread.build().unwrap());
    source
}

/// A class with `methods` methods, each calling `name` on its argument `calls` times.
fn caller(name: &str, methods: usize, calls: usize) -> Vec<u8> {
    let mut builder = ClassBuilder::new("bench/Caller", "java/lang/Object");
    let [hi, lo] = builder
        .methodref(THREAD, name, "()V")
        .unwrap()
        .to_be_bytes();

    let mut code = Vec::with_capacity(calls * 4 + 1);
    for _ in 0..calls {
        code.extend([opcodes::ALOAD_0, opcodes::INVOKEVIRTUAL, hi, lo]);
    }
    code.push(opcodes::RETURN);

    for method in 0..methods {
        builder.method(
            0x0009,
            &format!("m{method}"),
            "(Ljava/lang/Thread;)V",
            CodeAttribute {
                max_stack: 1,
                max_locals: 1,
                code: code.clone(),
                exception_table: Vec::new(),
                attributes: Vec::new(),
            },
        );
    }
    builder.build().unwrap()
}

fn transformer(source: &MemorySource) -> Transformer {
    let (logger, _) = Logger::memory();
    let target = TargetType::resolve(source).unwrap();
    Transformer::new(Config::default(), Some(target.into()), logger)
}

fn ty(bytes: &[u8]) -> TypeUnderTransformation<'_> {
    TypeUnderTransformation {
        name: Some("bench/Caller"),
        display_name: Some("bench.Caller"),
        bytes,
    }
}

/// Benchmark parsing and writing back a class without edits.
fn bench_classfile_roundtrip(c: &mut Criterion) {
    let bytes = caller("run", 20, 20);

    c.bench_function("classfile_roundtrip", |b| {
        b.iter(|| {
            let class = ClassFile::parse(black_box(&bytes)).unwrap();
            black_box(class.to_bytes().unwrap())
        });
    });
}

/// Benchmark the hook on a class that only calls `run`.
fn bench_transform_untouched(c: &mut Criterion) {
    let source = thread_source();
    let transformer = transformer(&source);
    let bytes = caller("run", 20, 20);

    c.bench_function("transform_untouched", |b| {
        b.iter(|| black_box(transformer.transform(black_box(&ty(&bytes)), &source)));
    });
}

/// Benchmark the hook on a class with 400 `start` call sites.
fn bench_transform_rewrite(c: &mut Criterion) {
    let source = thread_source();
    let transformer = transformer(&source);
    let bytes = caller("start", 20, 20);

    c.bench_function("transform_rewrite", |b| {
        b.iter(|| black_box(transformer.transform(black_box(&ty(&bytes)), &source)));
    });
}

criterion_group!(
    benches,
    bench_classfile_roundtrip,
    bench_transform_untouched,
    bench_transform_rewrite,
);
criterion_main!(benches);
