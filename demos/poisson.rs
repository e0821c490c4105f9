use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;

use clap::{AppSettings, Clap};

use stratum::fac::{FacPreconditioner, FacSettings, FacStrategy, MgCycleType};
use stratum::poisson::{poisson_hierarchy, PoissonFacStrategy};
use stratum::vector::CompositeVector;




#[derive(Debug, Clap)]
#[clap(version = "0.1", about = "Solve -u'' = f on (0, 1) by FAC multigrid cycling")]
#[clap(setting = AppSettings::ColoredHelp)]
struct Opts {
    #[clap(short = 'l', long, default_value = "5")]
    num_levels: usize,

    #[clap(short = 'z', long, default_value = "3")]
    coarsest_zones: usize,

    /// Cycle shape: V, W, or F (a _CYCLE suffix is accepted)
    #[clap(short = 'c', long, default_value = "V")]
    cycle: String,

    #[clap(long, default_value = "1")]
    pre_sweeps: usize,

    #[clap(long, default_value = "1")]
    post_sweeps: usize,

    #[clap(short = 'n', long, default_value = "50")]
    max_cycles: usize,

    /// Stop when the residual norm has fallen by this factor
    #[clap(short = 'r', long, default_value = "1e-10")]
    tolerance: f64,

    #[clap(short = 'v', long)]
    verbose: bool,
}




#[derive(serde::Serialize)]


/**
 * The converged solution state, written to solution.cbor
 */
struct Solution {
    num_levels: usize,
    cycle: String,
    cycles_taken: usize,
    residual_norm: f64,
    finest_spacing: f64,
    values: Vec<f64>,
}




// ============================================================================
fn main() {
    let opts = Opts::parse();

    simple_logger::SimpleLogger::new()
        .with_level(if opts.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init()
        .unwrap();

    let cycle_type: MgCycleType = match opts.cycle.parse() {
        Ok(cycle_type) => cycle_type,
        Err(error) => {
            eprintln!("{}", error);
            std::process::exit(1)
        }
    };

    let hierarchy = poisson_hierarchy(opts.num_levels, opts.coarsest_zones);
    let finest = hierarchy.finest_level_number();
    let strategy = Rc::new(RefCell::new(PoissonFacStrategy::new(hierarchy.clone())));
    let h = strategy.borrow().spacing(finest);

    let vector = |name: &str| {
        let mut v = CompositeVector::new(name, hierarchy.clone(), 0, finest);
        v.add_component("u", hierarchy.reserve_descriptor(), None);
        v.allocate_vector_data();
        v
    };
    let u = vector("solution");
    let f = vector("rhs");
    let e = vector("correction");
    let r = vector("residual");

    {
        let field = f.field(0);
        let mut field = field.borrow_mut();
        for (i, x) in field.patch_mut(finest, 0).iter_mut().enumerate() {
            *x = PI * PI * (PI * (i as f64 + 1.0) * h).sin();
        }
    }

    let settings = FacSettings {
        cycle_type,
        num_pre_sweeps: opts.pre_sweeps,
        num_post_sweeps: opts.post_sweeps,
        enable_logging: opts.verbose,
    };
    let mut driver = FacPreconditioner::new("poisson_fac", strategy.clone(), settings);
    driver.initialize_solver_state(&e, &r);

    strategy.borrow_mut().compute_residual(&r, &u, &f, finest, finest);
    let initial_norm = r.l2_norm();
    let mut residual_norm = initial_norm;
    let mut cycles_taken = 0;

    for cycle in 1..=opts.max_cycles {
        e.set_to_scalar(0.0);
        driver.solve_system(&e, &r);
        u.add(&u, &e);

        strategy.borrow_mut().compute_residual(&r, &u, &f, finest, finest);
        residual_norm = r.l2_norm();
        cycles_taken = cycle;
        println!("[{}] |r| = {:.3e} (reduction {:.3e})", cycle, residual_norm, residual_norm / initial_norm);

        if residual_norm <= opts.tolerance * initial_norm {
            break
        }
    }
    driver.deallocate_solver_state();

    let solution = Solution {
        num_levels: opts.num_levels,
        cycle: opts.cycle,
        cycles_taken,
        residual_norm,
        finest_spacing: h,
        values: u.field(0).borrow().patch(finest, 0).to_vec(),
    };
    let file = std::fs::File::create("solution.cbor").unwrap();
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&solution, &mut buffer).unwrap();
}
