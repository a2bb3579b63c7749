use anyhow::{Context, Result};
use lmpc::{split, DynamicsModel, Transition};
use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

// cargo run --example train-dynamics --release

// 状態: [x, y, vx, vy, cosθ, sinθ] / 入力: [推力, 操舵]
const STATE_SIZE: usize = 6;
const ACTION_SIZE: usize = 2;
const POLICY_FREQ: f64 = 10.0;
const DT: f64 = 1.0 / POLICY_FREQ;

const ACCEL: f64 = 2.0;
const STEER: f64 = 1.5;
const DRAG: f64 = 0.2;

fn env_step(x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
    let theta = x[5].atan2(x[4]);
    let theta_n = theta + STEER * u[1] * DT;
    let ax = ACCEL * u[0] * theta.cos() - DRAG * x[2];
    let ay = ACCEL * u[0] * theta.sin() - DRAG * x[3];
    DVector::from_vec(vec![
        x[0] + x[2] * DT,
        x[1] + x[3] * DT,
        x[2] + ax * DT,
        x[3] + ay * DT,
        theta_n.cos(),
        theta_n.sin(),
    ])
}

fn random_state(rng: &mut Xoshiro256PlusPlus) -> DVector<f64> {
    let theta = rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
    DVector::from_vec(vec![
        rng.gen_range(-3.0..3.0),
        rng.gen_range(-3.0..3.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        theta.cos(),
        theta.sin(),
    ])
}

fn collect_transitions(count: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<Transition> {
    let mut data = Vec::with_capacity(count);
    let mut x = random_state(rng);
    let mut age = 0;
    while data.len() < count {
        if age == 30 {
            x = random_state(rng);
            age = 0;
        }
        let u = DVector::from_fn(ACTION_SIZE, |_, _| rng.gen_range(-1.0..1.0));
        let next = env_step(&x, &u);
        data.push(Transition::new(x.clone(), u, next.clone()));
        x = next;
        age += 1;
    }
    data
}

fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    let data = collect_transitions(5000, &mut rng);
    let (train_set, val_set) = split(&data, 0.7);
    log::info!(
        "collected {} transitions ({} train / {} val)",
        data.len(),
        train_set.len(),
        val_set.len()
    );

    let mut model = DynamicsModel::new(STATE_SIZE, ACTION_SIZE, DT, vec![0, 1], &mut rng)?;
    let curve = model.train(train_set, val_set, 600, 0.5)?;

    std::fs::create_dir_all("logs")?;
    let mut wtr = csv::Writer::from_path("logs/train-dynamics.csv")?;
    for (epoch, (train_loss, val_loss)) in curve.iter().enumerate() {
        wtr.write_record(&[
            epoch.to_string(),
            train_loss.to_string(),
            val_loss.to_string(),
        ])?;
    }
    wtr.flush()?;

    let (train_loss, val_loss) = *curve.last().context("no epochs")?;
    log::info!("final loss: train={train_loss:.3e} val={val_loss:.3e}");
    Ok(())
}
