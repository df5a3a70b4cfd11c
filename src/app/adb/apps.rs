/// Parses `pm list packages [-3]` into sorted, de-duplicated package names.
pub fn parse_pm_list_packages_output(output: &str) -> Vec<String> {
    let mut packages: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("package:"))
        .map(|payload| {
            // `-f` style rows carry `<apk path>=<package>`.
            payload
                .rsplit_once('=')
                .map(|(_, pkg)| pkg)
                .unwrap_or(payload)
                .trim()
                .to_string()
        })
        .filter(|pkg| !pkg.is_empty())
        .collect();
    packages.sort();
    packages.dedup();
    packages
}

/// Finds the uid of `package` in `cmd package list packages -U` output.
///
/// Expected lines: `package:com.example.app uid:10234`.
pub fn parse_package_uid(output: &str, package: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let name = parts.next()?.strip_prefix("package:")?;
        if name != package {
            return None;
        }
        parts
            .find_map(|part| part.strip_prefix("uid:"))
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.parse::<u32>().ok())
    })
}

/// `pidof` prints space-separated pids; the first one is the main process.
pub fn parse_pidof_output(output: &str) -> Option<u32> {
    output
        .split_whitespace()
        .next()
        .and_then(|value| value.parse::<u32>().ok())
}

/// Monkey exits 0 even when the package has no launcher activity.
pub fn monkey_launch_failure(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| {
            line.contains("monkey aborted") || line.starts_with("** No activities found to run")
        })
        .map(str::to_string)
}

/// `pm clear` prints `Success` or `Failed`; older builds exit 0 either way.
pub fn pm_clear_failure(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.lines().any(|line| line.trim() == "Success") {
        return None;
    }
    if trimmed.is_empty() {
        return Some("pm clear produced no output".to_string());
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_path_package_rows() {
        let output = "package:com.zeta.app\npackage:/data/app/base.apk=com.alpha.app\n\npackage:com.zeta.app\nnoise\n";
        assert_eq!(
            parse_pm_list_packages_output(output),
            vec!["com.alpha.app".to_string(), "com.zeta.app".to_string()]
        );
    }

    #[test]
    fn finds_uid_for_exact_package() {
        let output = "package:com.example.app.debug uid:10300\npackage:com.example.app uid:10234\n";
        assert_eq!(parse_package_uid(output, "com.example.app"), Some(10234));
        assert_eq!(parse_package_uid(output, "com.missing"), None);
    }

    #[test]
    fn parses_first_pid() {
        assert_eq!(parse_pidof_output("4321 4400\n"), Some(4321));
        assert_eq!(parse_pidof_output(""), None);
    }

    #[test]
    fn detects_monkey_abort() {
        let output = "  bash arg: -p\n** No activities found to run, monkey aborted.\n";
        assert!(monkey_launch_failure(output).is_some());
        assert!(monkey_launch_failure("Events injected: 1\n").is_none());
    }

    #[test]
    fn pm_clear_requires_success_line() {
        assert_eq!(pm_clear_failure("Success\n"), None);
        assert_eq!(pm_clear_failure("Failed\n").as_deref(), Some("Failed"));
    }
}
