//! Renderer for `/sys/devices/system/cpu/online`.

/// Renders the online file for a view with `count` virtual CPUs.
///
/// Virtual CPUs are always numbered densely from zero, so the content is
/// `0-(N-1)` regardless of which host CPUs back them. An empty cpuset
/// renders as a bare newline, matching the kernel's empty-cpulist output.
pub fn render_online(count: usize) -> String {
    match count {
        0 => "\n".to_owned(),
        1 => "0\n".to_owned(),
        n => format!("0-{}\n", n - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_online() {
        assert_eq!(render_online(0), "\n");
        assert_eq!(render_online(1), "0\n");
        assert_eq!(render_online(2), "0-1\n");
        assert_eq!(render_online(8), "0-7\n");
    }
}
