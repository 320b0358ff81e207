// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use proteus::config::WriteDurability;
use proteus::model::encoding::{decode, encode};
use proteus::model::Encoding;
use proteus::store::{DiskFileService, MemoryFileService};
use proteus::{LoadOptions, Resource, SaveOptions, TextEdit, TextFileModel};
use tokio::runtime::Runtime;

mod fixtures;
mod profiler;

use fixtures::{Case, TempDir};

/// `TextFileModel::save` spawns, so it must be called inside `block_on`.
fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn memory_model(rt: &Runtime, content: &str) -> (Arc<MemoryFileService>, TextFileModel) {
    let files = Arc::new(MemoryFileService::new());
    let resource = Resource::new("/bench/doc.txt").expect("resource");
    files.insert(&resource, content);
    let model = TextFileModel::builder(resource, files.clone()).build();
    rt.block_on(model.load(LoadOptions::default())).expect("load");
    (files, model)
}

// Benchmark identity (keep stable):
// - Group names: `model.edit`, `model.save`, `encoding`
// - Case IDs after the `/` must stay stable so results remain comparable.
fn benches_edit(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("model.edit");

    let small = fixtures::document(Case::Small);
    group.bench_function("type_and_undo_small", |b| {
        b.iter_batched_ref(
            || memory_model(&rt, &small).1,
            |model| {
                for i in 0..32 {
                    model
                        .apply_edit(&TextEdit::insert(i, "k"))
                        .expect("apply_edit");
                }
                model.undo().expect("undo");
                black_box(model.is_dirty())
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn benches_save(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("model.save");

    for (id, case) in [("memory_small", Case::Small), ("memory_large", Case::Large)] {
        let content = fixtures::document(case);
        group.bench_function(id, |b| {
            b.iter_batched_ref(
                || memory_model(&rt, &content),
                |(files, model)| {
                    model
                        .apply_edit(&TextEdit::insert(0, "// edited\n"))
                        .expect("apply_edit");
                    let saved = rt
                        .block_on(async { model.save(SaveOptions::default()).await })
                        .expect("save");
                    black_box((saved, files.write_count()))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.measurement_time(profiler::BenchEnv::from_env().io_measurement());
    for (id, case) in [("io_small", Case::Small), ("io_large", Case::Large)] {
        let content = fixtures::document(case);
        group.bench_function(id, |b| {
            b.iter_batched_ref(
                || {
                    let tmp = TempDir::new(id);
                    let path = tmp.path().join("doc.txt");
                    std::fs::write(&path, &content).expect("seed file");
                    let resource = Resource::from_path(&path).expect("resource");
                    let files = Arc::new(DiskFileService::new(WriteDurability::BestEffort));
                    let model = TextFileModel::builder(resource, files).build();
                    rt.block_on(model.load(LoadOptions::default())).expect("load");
                    (tmp, model)
                },
                |(_tmp, model)| {
                    model
                        .apply_edit(&TextEdit::insert(0, "// edited\n"))
                        .expect("apply_edit");
                    black_box(
                        rt.block_on(async { model.save(SaveOptions::default()).await })
                            .expect("save"),
                    )
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn benches_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    let large = fixtures::document(Case::Large);
    let utf16 = encode(&large, Encoding::Utf16Le);

    group.bench_function("encode_utf16le_large", |b| {
        b.iter(|| black_box(encode(black_box(&large), Encoding::Utf16Le).len()))
    });
    group.bench_function("decode_utf16le_large", |b| {
        b.iter(|| black_box(decode(black_box(&utf16), None).0.len()))
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = profiler::criterion();
    targets = benches_edit, benches_save, benches_encoding
}
criterion_main!(benches);
