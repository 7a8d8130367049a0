use itertools::Itertools;

/// Convert an io::error to a string and strip "(os error 4)" from the end.
fn io_error_to_string(err: &std::io::Error) -> String {
    let s = err.to_string();
    s.strip_suffix(&format!(" (os error {})", err.raw_os_error().unwrap_or(0)))
        .unwrap_or(&s)
        .to_string()
}

/// Format an error and its causes, one per line.
pub fn format_error_chain(err: &anyhow::Error) -> String {
    let error_chain = err.chain().join("\n\tCaused by: ");
    match err.downcast_ref::<std::io::Error>() {
        Some(io_err) => {
            let io_err_str = io_error_to_string(io_err);
            match err.chain().len() {
                1 => format!("ERROR: {io_err_str}"),
                2 => format!("ERROR: {io_err_str}: {err}"),
                _ => format!("ERROR: {error_chain}"),
            }
        }
        None => format!("ERROR: {error_chain}"),
    }
}

/// Print an error chain.
pub fn print_error_chain(err: &anyhow::Error) {
    eprintln!("{}", format_error_chain(err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("no such sample"))
            .context("reading sample sheet")
            .unwrap_err();
        assert_eq!(
            format_error_chain(&err),
            "ERROR: reading sample sheet\n\tCaused by: no such sample"
        );

        let io = std::io::Error::from_raw_os_error(2);
        let err = anyhow::Error::new(io);
        assert_eq!(
            format_error_chain(&err),
            "ERROR: No such file or directory"
        );
    }
}
