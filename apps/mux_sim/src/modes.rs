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

use std::str::FromStr;
use structopt::StructOpt;

// How the consumer of the multiplexed stream asserts ready:
// Always never stalls, Periodic stalls one tick out of four, Random stalls
// half of the ticks.
#[derive(StructOpt, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerMode {
    Always,
    Periodic,
    Random,
}

impl FromStr for ConsumerMode {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(ConsumerMode::Always),
            "Periodic" => Ok(ConsumerMode::Periodic),
            "Random" => Ok(ConsumerMode::Random),
            _ => Err(Self::Err::new(
                std::io::ErrorKind::Other,
                format!("Invalid consumer mode: {}", s),
            )),
        }
    }
}
