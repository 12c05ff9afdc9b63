//! Renderer for `/proc/cpuinfo`.
//!
//! The host file is a sequence of processor blocks separated by blank
//! lines, each starting with a `processor : N` line. The view keeps only
//! the blocks whose host CPU id the caller may use and renumbers them
//! densely from zero, leaving every other byte of the kept blocks intact.

/// Renders the cpuinfo view.
///
/// `keep` is the ordered list of host CPU ids visible to the caller; the
/// position of an id in the list becomes its virtual processor number.
/// Blocks without a `processor` line (vendor preambles, the ARM `Hardware:`
/// trailer) pass through unchanged.
pub fn render(host_cpuinfo: &str, keep: &[u32]) -> String {
    let mut out = String::with_capacity(host_cpuinfo.len());

    for block in host_cpuinfo.split_inclusive("\n\n") {
        match block_processor_id(block) {
            Some(host_id) => {
                if let Some(virt_id) = keep.iter().position(|&id| id == host_id) {
                    out.push_str(&renumber_block(block, virt_id));
                }
            }
            None => out.push_str(block),
        }
    }

    out
}

/// Extracts the host CPU id from a block's `processor` line.
fn block_processor_id(block: &str) -> Option<u32> {
    for line in block.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim_end() == "processor" {
                return value.trim().parse::<u32>().ok();
            }
        }
    }
    None
}

/// Rewrites the `processor` line of a block with a new id, preserving the
/// host's key padding.
fn renumber_block(block: &str, virt_id: usize) -> String {
    let mut out = String::with_capacity(block.len());
    for line in block.split_inclusive('\n') {
        let rewritten = line.split_once(':').and_then(|(key, _)| {
            if key.trim_end() == "processor" {
                Some(format!("{key}: {virt_id}\n"))
            } else {
                None
            }
        });
        match rewritten {
            Some(new_line) => out.push_str(&new_line),
            None => out.push_str(line),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Test CPU @ 2.40GHz

processor\t: 1
vendor_id\t: GenuineIntel
model name\t: Test CPU @ 2.40GHz

processor\t: 2
vendor_id\t: GenuineIntel
model name\t: Test CPU @ 2.40GHz

processor\t: 5
vendor_id\t: GenuineIntel
model name\t: Test CPU @ 2.40GHz
";

    #[test]
    fn test_filters_and_renumbers() {
        let out = render(HOST, &[2, 5]);
        let processors: Vec<&str> = out
            .lines()
            .filter(|l| l.starts_with("processor"))
            .collect();
        assert_eq!(processors, vec!["processor\t: 0", "processor\t: 1"]);
        // Two blocks survive with their payload intact.
        assert_eq!(out.matches("GenuineIntel").count(), 2);
    }

    #[test]
    fn test_keep_order_defines_numbering() {
        let out = render(HOST, &[5, 2]);
        // Host CPU 2 sits at position 1 of the keep list.
        let expected_first = out.lines().next().unwrap();
        assert_eq!(expected_first, "processor\t: 1");
    }

    #[test]
    fn test_empty_keep_renders_nothing() {
        assert_eq!(render(HOST, &[]), "");
    }

    #[test]
    fn test_non_processor_block_passes_through() {
        let host = "processor\t: 0\nmodel\t: X\n\nHardware\t: Test Board\n";
        let out = render(host, &[0]);
        assert!(out.contains("Hardware\t: Test Board"));
    }
}
