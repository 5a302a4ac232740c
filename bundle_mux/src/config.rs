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

use crate::Error;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Number of sub-channels carried by one ADAT bundle frame.
pub const NO_CHANNELS_ADAT: usize = 8;

/// Width of a sample payload, in bits.
pub const SAMPLE_WIDTH: usize = 24;

pub const DEFAULT_BUNDLE_COUNT: usize = 4;

/// Widest payload the model carries (payloads are `u32`).
const MAX_SAMPLE_WIDTH: usize = 32;

/// Determines the number of bits required to represent `x`.
pub const fn bit_size(x: usize) -> usize {
    let x = x as u64; // Number of bits now predictable
    (64 - x.leading_zeros()) as usize
}

/// Number of bits of a signal holding values in `0..n`.
///
/// `range_bits(1) == 0`: a single value needs no storage.
pub const fn range_bits(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        bit_size(n - 1)
    }
}

/// Geometry of a multiplexer; fixed once the multiplexer is constructed.
///
/// Constructed programmatically or read from a YAML config file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfiguration {
    pub bundle_count: usize,
    pub channels_per_bundle: usize,
    pub sample_width: usize,
}

impl Default for MuxConfiguration {
    fn default() -> Self {
        Self {
            bundle_count: DEFAULT_BUNDLE_COUNT,
            channels_per_bundle: NO_CHANNELS_ADAT,
            sample_width: SAMPLE_WIDTH,
        }
    }
}

impl MuxConfiguration {
    pub fn with_bundles(bundle_count: usize) -> Self {
        Self {
            bundle_count,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bundle_count == 0 {
            return Err(Error::InvalidBundleCount);
        }
        if self.channels_per_bundle == 0 {
            return Err(Error::InvalidChannelCount);
        }
        if self.sample_width == 0 || self.sample_width > MAX_SAMPLE_WIDTH {
            return Err(Error::InvalidSampleWidth(self.sample_width));
        }
        Ok(())
    }

    /// Total number of output channels, `N * C`.
    pub fn channel_count(&self) -> usize {
        self.bundle_count * self.channels_per_bundle
    }

    /// Width of the global channel number on the output stream.
    pub fn channel_bits(&self) -> usize {
        range_bits(self.channel_count())
    }

    /// Width of the sub-channel index on a bundle stream.
    pub fn bundle_channel_bits(&self) -> usize {
        range_bits(self.channels_per_bundle)
    }

    /// Width of one elastic buffer record: sample, sub-channel index, last flag.
    pub fn record_width(&self) -> usize {
        self.sample_width + self.bundle_channel_bits() + 1
    }

    pub fn last_bundle(&self) -> usize {
        self.bundle_count - 1
    }

    pub fn from_file<P: AsRef<Path>>(file_name: P) -> anyhow::Result<Self> {
        let path = file_name.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Configuration file {} not found", path.display()))?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)
            .with_context(|| format!("Malformed configuration file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config)?;
        config.validate()?;
        Ok(config)
    }
}
