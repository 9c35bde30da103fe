//! Solve a pentadiagonal system with block-Jacobi ILU(0) preconditioned FGMRES
//! on four in-process ranks.

use kryst_dist::config::options::{FactorOptions, KspOptions};
use kryst_dist::context::KspContext;
use kryst_dist::matrix::{DistMatrix, InsertMode};
use kryst_dist::parallel::{Comm, ThreadComm};
use kryst_dist::preconditioner::BlockJacobiIlu;

fn main() {
    let n = 100;
    let results = ThreadComm::spawn_ranks(4, |comm| -> Result<(usize, f64), kryst_dist::KError> {
        let mut a = DistMatrix::create(&comm, None, None, Some(n), Some(n))?;
        let rows = a.row_layout().clone();
        for i in rows.start()..rows.end() {
            let cols: Vec<usize> = (i.saturating_sub(2)..(i + 3).min(n)).collect();
            let vals: Vec<f64> = cols.iter().map(|&c| if c == i { 5.0 } else { -1.0 }).collect();
            a.set_values(&[i], &cols, &vals, InsertMode::Insert)?;
        }
        a.assemble()?;

        let b = vec![1.0; rows.local_size()];
        let mut x = vec![0.0; rows.local_size()];
        let mut ksp = KspContext::create_fgmres_distributed(&comm, 30);
        ksp.set_operator(&a);
        ksp.set_fixed_preconditioner(BlockJacobiIlu::new(&a, &FactorOptions::ilu(0))?);
        ksp.set_from_options(&KspOptions::from_pairs([("rtol", "1e-10")])?)?;
        let reason = ksp.solve(&b, &mut x)?;
        if comm.rank() == 0 {
            println!("{reason:?} after {} iterations", ksp.iteration_count());
            for (its, r) in ksp.residual_history().iter().enumerate() {
                println!("{its:3} {r:.3e}");
            }
        }
        let local: f64 = x.iter().sum();
        Ok((ksp.iteration_count(), comm.all_reduce_sum(local)?))
    });
    for (rank, r) in results.into_iter().enumerate() {
        match r {
            Ok((its, sum)) => println!("rank {rank}: {its} iterations, sum(x) = {sum:.12}"),
            Err(e) => eprintln!("rank {rank}: {e}"),
        }
    }
}
