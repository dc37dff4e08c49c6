//! Command-line input checks performed before any process starts.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use hlscast_core::config::{NetworkConfig, ToolsConfig, ValidationConfig};
use hlscast_core::network::is_port_free;
use hlscast_core::{HlscastError, StreamSource};
use tokio::process::Command;
use url::Url;

fn invalid(reason: impl Into<String>) -> HlscastError {
    HlscastError::Validation {
        reason: reason.into(),
    }
}

/// Checks that both media tools start and report a version.
///
/// # Errors
/// - `HlscastError::Validation` - A tool is missing or fails to run
pub async fn check_tools(tools: &ToolsConfig) -> Result<(), HlscastError> {
    for program in [&tools.ffmpeg_path, &tools.ffprobe_path] {
        let status = Command::new(program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::debug!("{} -version exited with {}", program.display(), status);
                return Err(invalid("FFmpeg or FFprobe is not installed or not in PATH."));
            }
            Err(e) => {
                tracing::debug!("{} could not be started: {}", program.display(), e);
                return Err(invalid("FFmpeg or FFprobe is not installed or not in PATH."));
            }
        }
    }
    Ok(())
}

/// Checks the port range, then that the port is free on `address`.
///
/// # Errors
/// - `HlscastError::Validation` - Out of range or already bound
pub fn validate_port(
    network: &NetworkConfig,
    address: Ipv4Addr,
    port: u16,
) -> Result<u16, HlscastError> {
    if !network.contains_port(port) {
        return Err(invalid(format!(
            "the port must be between {}-{}.",
            network.port_range.start(),
            network.port_range.end()
        )));
    }
    if !is_port_free(address, port) {
        return Err(invalid(format!(
            "Port {port} is already in use on {address}. Choose another port."
        )));
    }
    Ok(port)
}

/// Resolves the streaming directory against the working directory and
/// creates it when missing.
///
/// # Errors
/// - `HlscastError::Validation` - Not absolute, not a directory, or not creatable
pub fn prepare_streaming_dir(dir: &Path) -> Result<PathBuf, HlscastError> {
    let resolved = std::path::absolute(dir)
        .map_err(|e| invalid(format!("the streaming directory can't be resolved: {e}.")))?;
    if !resolved.is_absolute() {
        return Err(invalid("the streaming directory path isn't absolute."));
    }

    if resolved.exists() {
        if resolved.is_dir() {
            return Ok(resolved);
        }
        return Err(invalid(
            "the streaming directory path doesn't refer to a directory.",
        ));
    }

    std::fs::create_dir_all(&resolved)
        .map_err(|e| invalid(format!("the streaming directory can't be created: {e}.")))?;
    println!("Streaming directory created: {}.", resolved.display());
    Ok(resolved)
}

/// Accepts an absolute path to an existing file with a known video extension.
///
/// # Errors
/// - `HlscastError::Validation` - Relative path, missing file, or unknown extension
pub fn validate_local_video(
    path: &Path,
    validation: &ValidationConfig,
) -> Result<StreamSource, HlscastError> {
    if !path.is_absolute() {
        return Err(invalid("the local video path isn't absolute."));
    }
    if !path.is_file() {
        return Err(invalid("the local video path doesn't refer to a video."));
    }

    let known = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| validation.is_video_extension(ext));
    if !known {
        return Err(invalid(
            "the local video path refers to a file that isn't a video.",
        ));
    }
    Ok(StreamSource::Local(path.to_path_buf()))
}

/// Accepts an `http` or `https` URL with a host.
///
/// # Errors
/// - `HlscastError::Validation` - Unparsable URL, other scheme, or no host
pub fn validate_remote_url(raw: &str) -> Result<StreamSource, HlscastError> {
    let url = Url::parse(raw).map_err(|_| invalid("the video remote url is not valid."))?;
    let has_host = url.host_str().is_some_and(|host| !host.is_empty());
    if !matches!(url.scheme(), "http" | "https") || !has_host {
        return Err(invalid("the video remote url is not valid."));
    }
    Ok(StreamSource::Remote(url))
}
