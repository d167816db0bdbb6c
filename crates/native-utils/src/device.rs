use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

fn get_host() -> Host {
    cpal::default_host()
}

/// Finds the input device called `device_name`, or the host default.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("no default input device"),
        Some(target) => host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("input device '{target}' not found")),
    }
}

/// Finds the output device called `device_name`, or the host default.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("no default output device"),
        Some(target) => host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("output device '{target}' not found")),
    }
}

/// One line per input device: name, channels, rate, and a default marker.
pub fn describe_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.input_devices().context("failed to enumerate input devices")? {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        lines.push(describe(&name, device.default_input_config().ok(), &default_name));
    }
    Ok(lines.join("\n"))
}

pub fn describe_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.output_devices().context("failed to enumerate output devices")? {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        lines.push(describe(&name, device.default_output_config().ok(), &default_name));
    }
    Ok(lines.join("\n"))
}

fn describe(
    name: &str,
    config: Option<cpal::SupportedStreamConfig>,
    default_name: &Option<String>,
) -> String {
    let mut line = match config {
        Some(cfg) => format!(
            " * {}({}ch, {}hz)",
            name,
            cfg.channels(),
            cfg.sample_rate().0
        ),
        None => format!(" * {} (no default config)", name),
    };
    if default_name.as_deref() == Some(name) {
        line.push_str(" [default]");
    }
    line
}
