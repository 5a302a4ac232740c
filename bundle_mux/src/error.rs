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

use std::fmt;

/// Construction-time and API-misuse errors.
///
/// The per-tick datapath never returns errors: stalls are not faults, and
/// producer protocol violations are not detected.
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    InvalidBundleCount,
    InvalidChannelCount,
    InvalidSampleWidth(usize),
    InvalidBundle(usize),
    InputCountMismatch { expected: usize, actual: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidSampleWidth(width) => {
                write!(
                    f,
                    "ERROR: Invalid sample width {} (expected 1..=32 bits)",
                    width
                )
            }
            Self::InvalidBundle(bundle) => write!(f, "ERROR: Invalid bundle {}", bundle),
            Self::InputCountMismatch { expected, actual } => {
                write!(
                    f,
                    "ERROR: Expected {} bundle inputs, got {}",
                    expected, actual
                )
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

// this is needed to allow `anyhow::Result` to accept our definition of
// errors in the applications and system tests.
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_value() {
        assert_eq!(
            Error::InvalidSampleWidth(40).to_string(),
            "ERROR: Invalid sample width 40 (expected 1..=32 bits)"
        );
        assert_eq!(Error::InvalidBundle(7).to_string(), "ERROR: Invalid bundle 7");
        assert_eq!(Error::InvalidBundleCount.to_string(), "InvalidBundleCount");
    }

    #[test]
    fn converts_into_anyhow() {
        let err: anyhow::Error = Error::InvalidChannelCount.into();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::InvalidChannelCount)
        );
    }
}
