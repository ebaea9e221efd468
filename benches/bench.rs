// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{Criterion, criterion_group, criterion_main};
use flakeid::{IdGenerator, RandomResolver, Snowflake, Sonyflake, is_valid_id};
use std::sync::Arc;

fn bench_new(c: &mut Criterion) {
    c.bench_function("snowflake_new", |b| {
        b.iter(|| Snowflake::new(1, 1));
    });
}

fn bench_next_id(c: &mut Criterion) {
    let sf = Snowflake::new(1, 1).expect("Could not create Snowflake");
    c.bench_function("snowflake_next_id", |b| {
        b.iter(|| sf.next_id());
    });

    let sf = Sonyflake::new(1).expect("Could not create Sonyflake");
    c.bench_function("sonyflake_next_id", |b| {
        b.iter(|| sf.next_id());
    });
}

fn bench_random_resolver(c: &mut Criterion) {
    let sf = Snowflake::builder()
        .data_center_id(&|| Ok(1))
        .worker_id(&|| Ok(1))
        .sequence_resolver(Arc::new(RandomResolver::new()))
        .finalize()
        .expect("Could not create Snowflake");
    c.bench_function("snowflake_next_id_random_resolver", |b| {
        b.iter(|| sf.next_id());
    });
}

fn bench_parse(c: &mut Criterion) {
    let sf = Snowflake::new(1, 1).expect("Could not create Snowflake");
    let id = sf.id().expect("Could not generate id");
    c.bench_function("snowflake_parse_id", |b| {
        b.iter(|| sf.parse_id(&id, true));
    });
    c.bench_function("is_valid_id", |b| {
        b.iter(|| is_valid_id(id.as_str()));
    });
}

criterion_group!(
    snowflake_perf,
    bench_new,
    bench_next_id,
    bench_random_resolver,
    bench_parse
);
criterion_main!(snowflake_perf);
