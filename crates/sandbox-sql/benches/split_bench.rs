//! Splitter and namespacer benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sandbox_sql::{split_statements, SessionNamespacer, SessionToken, SplitOptions, StatementSplitter};

fn simple_script(statements: usize) -> String {
    let mut script = String::from("CREATE TABLE employees (id INT, name TEXT, dept INT);\n");
    for i in 0..statements {
        script.push_str(&format!(
            "INSERT INTO employees VALUES ({}, 'name; {}', {}); -- row {}\n",
            i,
            i,
            i % 7,
            i
        ));
    }
    script
}

fn block_script(blocks: usize) -> String {
    let mut script = String::new();
    for i in 0..blocks {
        script.push_str(&format!(
            "CREATE OR REPLACE PROCEDURE p{} AS\nBEGIN\n  INSERT INTO log VALUES ({});\nEND;\n/\n",
            i, i
        ));
    }
    script
}

fn split_simple_benchmark(c: &mut Criterion) {
    let script = simple_script(1000);
    c.bench_function("split_simple_1000", |b| {
        b.iter(|| black_box(split_statements(black_box(&script)).len()))
    });
}

fn split_blocks_benchmark(c: &mut Criterion) {
    let script = block_script(200);
    c.bench_function("split_blocks_200", |b| {
        b.iter(|| black_box(split_statements(black_box(&script)).len()))
    });
}

fn split_sqlite_benchmark(c: &mut Criterion) {
    let script = simple_script(1000);
    let splitter = StatementSplitter::new(SplitOptions::sqlite());
    c.bench_function("split_sqlite_1000", |b| {
        b.iter(|| black_box(splitter.split(black_box(&script)).len()))
    });
}

fn namespace_benchmark(c: &mut Criterion) {
    let namespacer = SessionNamespacer::new(SessionToken::sanitize("bench").unwrap());
    let sql = "SELECT e.name, d.name FROM employees e JOIN depts d ON e.dept = d.id \
               WHERE e.id IN (SELECT id FROM managers) ORDER BY e.name";
    c.bench_function("namespace_select", |b| {
        b.iter(|| black_box(namespacer.rewrite(black_box(sql))))
    });
}

criterion_group!(
    benches,
    split_simple_benchmark,
    split_blocks_benchmark,
    split_sqlite_benchmark,
    namespace_benchmark,
);
criterion_main!(benches);
