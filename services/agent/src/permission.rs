use async_trait::async_trait;
use voice_core::{MediaPermissionProvider, PermissionDecision};

/// Grants every request. Used when the service runs without audio devices,
/// for example against a text-only agent or in CI.
#[cfg_attr(feature = "native-audio", allow(dead_code))]
#[derive(Debug, Default)]
pub struct HeadlessPermission;

#[async_trait]
impl MediaPermissionProvider for HeadlessPermission {
    async fn request_audio_capture(&self) -> PermissionDecision {
        tracing::warn!("no audio devices in use; microphone capture granted without a device");
        PermissionDecision::Granted
    }
}

/// Checks that a default input device exists and exposes a usable config.
#[cfg(feature = "native-audio")]
#[derive(Debug, Default)]
pub struct DevicePermission {
    device_name: Option<String>,
}

#[cfg(feature = "native-audio")]
#[async_trait]
impl MediaPermissionProvider for DevicePermission {
    async fn request_audio_capture(&self) -> PermissionDecision {
        use cpal::traits::DeviceTrait;

        let device_name = self.device_name.clone();
        // cpal enumerates devices synchronously and may block on the host.
        let lookup = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let device = voice_native_utils::device::get_or_default_input(device_name.as_deref())?;
            device.default_input_config()?;
            Ok(device.name()?)
        })
        .await;

        match lookup {
            Ok(Ok(name)) => {
                tracing::info!("microphone available: {}", name);
                PermissionDecision::Granted
            }
            Ok(Err(e)) => PermissionDecision::Unavailable(format!("{e:#}")),
            Err(e) => PermissionDecision::Unavailable(format!("device lookup failed: {e}")),
        }
    }
}
