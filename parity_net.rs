use std::error::Error;
use std::process;

use cellnet::architecture::{build_network, load_architecture};
use cellnet::config::{load_config, TrainingConfig};
use cellnet::layers::{Cell, CellInput, DenseLayer};
use cellnet::training::{train, Sample};
use cellnet::utils::{Activation, SimpleRng};
use cellnet::Network;

// 3-bit parity with a 3-3-1 tanh-sigmoid network.
// Usage: parity_net [training.json] [architecture.json]
const NUM_INPUTS: usize = 3;
const NUM_HIDDEN: usize = 3;

fn parity_samples() -> Vec<Sample> {
    (0..1 << NUM_INPUTS)
        .map(|bits: usize| {
            let input: Vec<f64> = (0..NUM_INPUTS).map(|b| ((bits >> b) & 1) as f64).collect();
            // even number of ones -> +1
            let target = if bits.count_ones() % 2 == 0 { 1.0 } else { -1.0 };
            Sample::new(input, vec![target])
        })
        .collect()
}

// Same shape as config/architectures/parity.json, wired by hand.
fn default_network(rng: &mut SimpleRng) -> cellnet::Result<Network> {
    let hidden = Cell::new(
        NUM_INPUTS,
        Some(CellInput::Data),
        None,
        0.0,
        Some(Activation::TanSigmoid),
    )?;
    let output = Cell::new(
        NUM_HIDDEN,
        Some(CellInput::all_cells(0, NUM_HIDDEN)),
        None,
        0.0,
        Some(Activation::TanSigmoid),
    )?;
    let mut net = Network::new(vec![
        DenseLayer::new(NUM_HIDDEN, &hidden)?.into(),
        DenseLayer::new(1, &output)?.into(),
    ])?;
    net.init_params(rng);
    Ok(net)
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    let config = match args.get(1) {
        Some(path) => load_config(path)?,
        None => {
            let mut cfg = TrainingConfig::new(0.05).with_momentum(0.5);
            cfg.max_epochs = 20_000;
            cfg.log_interval = Some(1_000);
            cfg
        }
    };

    let mut rng = match config.seed {
        Some(seed) => SimpleRng::new(seed),
        None => SimpleRng::from_time(),
    };

    let mut net = match args.get(2) {
        Some(path) => build_network(&load_architecture(path)?, &mut rng)?,
        None => default_network(&mut rng)?,
    };

    let samples = parity_samples();
    println!("Training on {} parity patterns...", samples.len());
    let summary = train(&mut net, &samples, &config)?;
    println!(
        "Stopped after {} epochs, mean error {:.6} ({})",
        summary.epochs,
        summary.mean_error,
        if summary.converged {
            "converged"
        } else {
            "epoch limit"
        }
    );

    for sample in &samples {
        net.set_input(&sample.input);
        net.forward()?;
        println!(
            "{:?} -> {:+.4} (target {:+.1})",
            sample.input,
            net.outputs()[0],
            sample.target[0]
        );
    }

    println!("\n{}", net);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        eprintln!("parity_net: {}", e);
        process::exit(1);
    }
}
