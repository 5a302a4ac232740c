// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bundle_mux::MuxConfiguration;
use env_logger::Target;
use std::path::PathBuf;
use structopt::StructOpt;

use mux_sim::{ConsumerMode, RunOptions};

#[derive(StructOpt)]
#[structopt(
    name = "mux-sim",
    about = "Cycle-level simulation of a bundle-to-channel multiplexer"
)]
struct Arguments {
    /// number of input bundles; ignored when a config file is given
    #[structopt(short, long, default_value = "4")]
    bundles: usize,
    /// YAML file with bundle_count, channels_per_bundle and sample_width
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// bundle frames sent by every bundle
    #[structopt(short, long, default_value = "4")]
    rounds: u32,
    /// upper bound on simulated cycles
    #[structopt(short, long, default_value = "10000")]
    cycles: usize,
    /// supported modes: Always, Periodic, Random
    #[structopt(long, default_value = "Always")]
    consumer: ConsumerMode,
    /// seed of the Random consumer
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// a source offers a new sample every `pacing` cycles
    #[structopt(short, long, default_value = "1")]
    pacing: usize,
    /// write a VCD trace of the run
    #[structopt(long, parse(from_os_str))]
    vcd: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::from_args();

    env_logger::Builder::from_default_env()
        .filter(Some("mux_sim"), log::LevelFilter::Info)
        .target(Target::Stderr)
        .init();

    let config = match &args.config {
        Some(path) => MuxConfiguration::from_file(path)?,
        None => {
            let config = MuxConfiguration::with_bundles(args.bundles);
            config.validate()?;
            config
        }
    };
    let options = RunOptions {
        config,
        rounds: args.rounds,
        max_cycles: args.cycles,
        consumer: args.consumer,
        seed: args.seed,
        pacing: args.pacing,
        vcd: args.vcd,
    };
    let summary = mux_sim::simulate_app(&options)?;
    log::info!(
        "{} events in {} cycles, {} rounds",
        summary.events,
        summary.cycles,
        summary.rounds
    );
    for violation in summary.violations.iter() {
        log::error!("{}", violation);
    }
    if !summary.is_ok() {
        anyhow::bail!("simulation failed: {:?}", summary);
    }
    Ok(())
}
