// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by user supplied callbacks and storage backends.
pub type BoxDynError = Box<dyn StdError + 'static + Send + Sync>;

/// The error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("start_time `{0}` is ahead of current time")]
    StartTimeAheadOfCurrentTime(DateTime<Utc>),
    #[error("machine_id returned an error: {0}")]
    MachineIdFailed(#[source] BoxDynError),
    #[error("data_center_id returned an error: {0}")]
    DataCenterIdFailed(#[source] BoxDynError),
    #[error("worker_id returned an error: {0}")]
    WorkerIdFailed(#[source] BoxDynError),
    #[error("check_machine_id returned false")]
    CheckMachineIdFailed,
    #[error("check_data_center_id returned false")]
    CheckDataCenterIdFailed,
    #[error("could not find any private ip address")]
    NoPrivateIp,
    /// The clock is behind the last issued bucket by the given milliseconds.
    #[error("clock moved backwards by {0}ms")]
    ClockRegression(i64),
    #[error("sequence exhausted for bucket {bucket} after waiting {waited:?}")]
    SequenceExhausted { bucket: i64, waited: Duration },
    #[error("sequence resolver unavailable: {0}")]
    ResolverUnavailable(#[source] BoxDynError),
    #[error("sequence resolver did not respond within {0:?}")]
    ResolverTimeout(Duration),
    #[error("malformed id `{0}`")]
    MalformedId(String),
    #[error("over the time limit")]
    OverTimeLimit,
    #[error("unsupported generator kind `{0}`")]
    UnsupportedGeneratorKind(String),
    #[error("invalid factory result: {0}")]
    InvalidFactoryResult(String),
}
