//! Configuration of a [MultipointComm](crate::comm::MultipointComm), stored as YAML.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use multipoint_transport::ice_server::IceServer;
use serde::Deserialize;
use serde::Serialize;

use crate::consts::DEFAULT_AUDIO_BANDWIDTH;
use crate::consts::DEFAULT_CALL_TIMEOUT_GUARD_MS;
use crate::consts::DEFAULT_CALL_TIMEOUT_MS;
use crate::consts::DEFAULT_ICE_SERVERS;
use crate::consts::DEFAULT_SIGNALING_TIMEOUT_MS;
use crate::consts::DEFAULT_VIDEO_BANDWIDTH;
use crate::consts::SIGNALING_DESTINATION;
use crate::error::Error;
use crate::error::Result;

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_call_timeout_guard_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_GUARD_MS
}

fn default_signaling_timeout_ms() -> u64 {
    DEFAULT_SIGNALING_TIMEOUT_MS
}

fn default_video_bandwidth() -> u32 {
    DEFAULT_VIDEO_BANDWIDTH
}

fn default_audio_bandwidth() -> u32 {
    DEFAULT_AUDIO_BANDWIDTH
}

fn default_destination() -> String {
    SIGNALING_DESTINATION.to_string()
}

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommConfig {
    /// `;` separated `stun://` / `turn://` urls.
    pub ice_servers: String,
    /// Caller side call timer.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Subtracted from `call_timeout_ms` for the callee's timer.
    #[serde(default = "default_call_timeout_guard_ms")]
    pub call_timeout_guard_ms: u64,
    /// Bound of one signaling round trip.
    #[serde(default = "default_signaling_timeout_ms")]
    pub signaling_timeout_ms: u64,
    /// Video bandwidth announced for local endpoints.
    #[serde(default = "default_video_bandwidth")]
    pub video_bandwidth_kbps: u32,
    /// Audio bandwidth announced for local endpoints.
    #[serde(default = "default_audio_bandwidth")]
    pub audio_bandwidth_kbps: u32,
    /// When there is no configuration in the YAML file,
    /// the default server side service name is used.
    #[serde(default = "default_destination")]
    pub signaling_destination: String,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ICE_SERVERS)
    }
}

impl CommConfig {
    /// Defaults with the given ICE servers.
    pub fn new(ice_servers: &str) -> Self {
        Self {
            ice_servers: ice_servers.to_string(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            call_timeout_guard_ms: DEFAULT_CALL_TIMEOUT_GUARD_MS,
            signaling_timeout_ms: DEFAULT_SIGNALING_TIMEOUT_MS,
            video_bandwidth_kbps: DEFAULT_VIDEO_BANDWIDTH,
            audio_bandwidth_kbps: DEFAULT_AUDIO_BANDWIDTH,
            signaling_destination: SIGNALING_DESTINATION.to_string(),
        }
    }

    /// Parse [CommConfig::ice_servers].
    pub fn parse_ice_servers(&self) -> Result<Vec<IceServer>> {
        IceServer::vec_from_str(&self.ice_servers).map_err(|e| Error::ConfigFile(e.to_string()))
    }

    /// Timer of an outbound call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Timer of an inbound call, never longer than [CommConfig::call_timeout].
    pub fn callee_timeout(&self) -> Duration {
        Duration::from_millis(
            self.call_timeout_ms
                .saturating_sub(self.call_timeout_guard_ms),
        )
    }

    /// Timeout of one signaling round trip.
    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_timeout_ms)
    }

    /// Write as YAML, creating parent directories.
    pub fn write_fs<P>(&self, path: P) -> Result<()>
    where P: AsRef<Path> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::ConfigFile(e.to_string()))?;
        }
        let f = fs::File::create(path).map_err(|e| Error::ConfigFile(e.to_string()))?;
        let f_writer = io::BufWriter::new(f);
        serde_yaml::to_writer(f_writer, self).map_err(|e| Error::ConfigFile(e.to_string()))
    }

    /// Read from a YAML file.
    pub fn read_fs<P>(path: P) -> Result<CommConfig>
    where P: AsRef<Path> {
        let path = path.as_ref();
        tracing::debug!("Read config from: {:?}", path);
        let f = fs::File::open(path).map_err(|e| Error::ConfigFile(e.to_string()))?;
        let f_rdr = io::BufReader::new(f);
        serde_yaml::from_reader(f_rdr).map_err(|e| Error::ConfigFile(e.to_string()))
    }
}
