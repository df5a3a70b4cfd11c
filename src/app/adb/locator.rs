use std::path::{Path, PathBuf};

const SDK_ENV_VARS: [&str; 2] = ["ANDROID_HOME", "ANDROID_SDK_ROOT"];

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Picks the adb binary: configured path, then `<sdk>/platform-tools/adb` from the SDK
/// environment variables, then plain `adb` resolved through `PATH` at spawn time.
pub fn resolve_adb_program(config_command_path: &str) -> String {
    let lookup = |key: &str| std::env::var(key).ok();
    resolve_adb_program_with(config_command_path, lookup)
}

fn resolve_adb_program_with(
    config_command_path: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    let normalized = normalize_command_path(config_command_path);
    if !normalized.is_empty() {
        return normalized;
    }
    for key in SDK_ENV_VARS {
        let Some(root) = lookup(key).filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        let candidate = PathBuf::from(root.trim())
            .join("platform-tools")
            .join(adb_file_name());
        if candidate.is_file() {
            return candidate.to_string_lossy().to_string();
        }
    }
    "adb".to_string()
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(normalize_command_path(" '/usr/bin/adb' "), "/usr/bin/adb");
    }

    #[test]
    fn configured_path_wins_over_sdk_env() {
        let resolved = resolve_adb_program_with("/custom/adb", |_| Some("/sdk".to_string()));
        assert_eq!(resolved, "/custom/adb");
    }

    #[test]
    fn finds_adb_under_sdk_platform_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = dir.path().join("platform-tools");
        std::fs::create_dir_all(&tools).expect("mkdir");
        let adb = tools.join(adb_file_name());
        std::fs::write(&adb, b"").expect("touch");

        let root = dir.path().to_string_lossy().to_string();
        let resolved = resolve_adb_program_with("", |key| {
            (key == "ANDROID_SDK_ROOT").then(|| root.clone())
        });
        assert_eq!(resolved, adb.to_string_lossy());
    }

    #[test]
    fn falls_back_to_path_lookup() {
        assert_eq!(resolve_adb_program_with("   ", |_| None), "adb");
    }

    #[test]
    fn validates_nonexistent_path() {
        let err = validate_adb_program("/this/path/should/not/exist/adb").unwrap_err();
        assert!(err.to_lowercase().contains("not found"));
    }
}
