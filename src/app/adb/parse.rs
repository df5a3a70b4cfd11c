use crate::app::models::{Device, DeviceStatus};

/// One row of `adb devices -l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub serial: String,
    pub status: DeviceStatus,
    pub model: Option<String>,
}

impl DeviceListing {
    pub fn into_device(self, model: Option<String>, os_version: Option<String>) -> Device {
        Device {
            id: self.serial,
            model: model.or(self.model),
            os_version,
            status: self.status,
        }
    }
}

pub fn parse_adb_devices(output: &str) -> Vec<DeviceListing> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.to_lowercase().starts_with("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next()?;
            let model = tokens
                .find_map(|token| token.strip_prefix("model:"))
                .map(|value| value.replace('_', " "));
            Some(DeviceListing {
                serial,
                status: DeviceStatus::from_adb_state(state),
                model,
            })
        })
        .collect()
}

/// `getprop <key>` prints the bare value; an unset property prints an empty line.
pub fn parse_getprop_value(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_devices_long_listing() {
        let output = "* daemon not running; starting now at tcp:5037\n\
* daemon started successfully\n\
List of devices attached\n\
R58M12ABCDE            device usb:1-1 product:beyond1 model:SM_G973F device:beyond1 transport_id:3\n\
emulator-5554          offline transport_id:1\n\
0123456789ABCDEF       unauthorized usb:1-2 transport_id:4\n\
weird-one              recovery\n";

        let devices = parse_adb_devices(output);
        assert_eq!(devices.len(), 4);
        assert_eq!(devices[0].serial, "R58M12ABCDE");
        assert_eq!(devices[0].status, DeviceStatus::Device);
        assert_eq!(devices[0].model.as_deref(), Some("SM G973F"));
        assert_eq!(devices[1].status, DeviceStatus::Offline);
        assert_eq!(devices[2].status, DeviceStatus::Unauthorized);
        assert_eq!(devices[3].status, DeviceStatus::Unknown);
    }

    #[test]
    fn getprop_model_overrides_listing_model() {
        let listing = DeviceListing {
            serial: "abc".to_string(),
            status: DeviceStatus::Device,
            model: Some("Pixel_7".to_string()),
        };
        let device = listing.into_device(Some("Pixel 7".to_string()), Some("14".to_string()));
        assert_eq!(device.model.as_deref(), Some("Pixel 7"));
        assert_eq!(device.os_version.as_deref(), Some("14"));
    }

    #[test]
    fn getprop_value_trims_and_rejects_empty() {
        assert_eq!(parse_getprop_value("14\r\n").as_deref(), Some("14"));
        assert_eq!(parse_getprop_value("\n"), None);
    }
}
