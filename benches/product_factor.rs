use criterion::{Criterion, black_box, criterion_group, criterion_main};
use faer::Mat;
use kryst_dist::config::options::FactorOptions;
use kryst_dist::factor::factor_symbolic;
use kryst_dist::matrix::{DistMatrix, InsertMode, MatReuse, RowStore, multiply_numeric, multiply_symbolic};
use kryst_dist::parallel::SerialComm;

fn banded(comm: &SerialComm, n: usize, half: usize) -> DistMatrix<'_, f64, SerialComm> {
    let mut a = DistMatrix::create(comm, None, None, Some(n), Some(n)).unwrap();
    for i in 0..n {
        let cols: Vec<usize> = (i.saturating_sub(half)..(i + half + 1).min(n)).collect();
        let vals: Vec<f64> = cols.iter().map(|&c| if c == i { 4.0 } else { -((c + i) as f64).sin() }).collect();
        a.set_values(&[i], &cols, &vals, InsertMode::Insert).unwrap();
    }
    a.assemble().unwrap();
    a
}

fn bench_product(c: &mut Criterion) {
    let comm = SerialComm;
    let a = banded(&comm, 2000, 3);
    let b = banded(&comm, 2000, 2);

    c.bench_function("product symbolic", |ben| {
        ben.iter(|| multiply_symbolic(black_box(&a), black_box(&b), 1.0).unwrap())
    });

    let mut plan = multiply_symbolic(&a, &b, 1.0).unwrap();
    let _ = multiply_numeric(&a, &b, &mut plan, MatReuse::Initial).unwrap();
    c.bench_function("product numeric (reuse)", |ben| {
        ben.iter(|| {
            multiply_numeric(black_box(&a), black_box(&b), &mut plan, MatReuse::Reuse).unwrap();
        })
    });
}

fn bench_factor(c: &mut Criterion) {
    let nb = 400;
    for bs in [1usize, 4] {
        let n = nb * bs;
        let dense = Mat::<f64>::from_fn(n, n, |i, j| {
            let (bi, bj) = (i / bs, j / bs);
            if i == j {
                10.0
            } else if bi.abs_diff(bj) <= 1 || bi.abs_diff(bj) == 20 {
                ((i * 31 + j * 17) % 13) as f64 / 13.0 - 0.5
            } else {
                0.0
            }
        });
        let a = RowStore::from_dense(&dense, bs).unwrap();
        let mut f = factor_symbolic(&a, None, None, &FactorOptions::ilu(1)).unwrap();
        c.bench_function(&format!("ilu(1) numeric bs={bs}"), |ben| {
            ben.iter(|| f.numeric(black_box(&a)).unwrap())
        });
    }
}

criterion_group!(benches, bench_product, bench_factor);
criterion_main!(benches);
