//! Minimal PEM certificate splitting

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// Splits a PEM bundle into its certificate blocks, in order.
///
/// Each returned block ends with a newline. Text outside certificate
/// blocks (comments, other PEM types) is dropped.
pub fn split_certificates(bundle: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = bundle;
    while let Some(start) = rest.find(BEGIN_CERTIFICATE) {
        let Some(end) = rest[start..].find(END_CERTIFICATE) else {
            break;
        };
        let end = start + end + END_CERTIFICATE.len();
        blocks.push(format!("{}\n", rest[start..end].trim()));
        rest = &rest[end..];
    }
    blocks
}

/// Normalizes a single certificate returned without PEM armor (bare base64 DER).
pub fn ensure_pem(certificate: &str) -> String {
    let trimmed = certificate.trim();
    if trimmed.starts_with(BEGIN_CERTIFICATE) {
        return format!("{trimmed}\n");
    }
    let body: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = String::with_capacity(body.len() + 64);
    pem.push_str(BEGIN_CERTIFICATE);
    pem.push('\n');
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(END_CERTIFICATE);
    pem.push('\n');
    pem
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----";
    const ROOT: &str = "-----BEGIN CERTIFICATE-----\nUk9PVA==\n-----END CERTIFICATE-----";

    #[test]
    fn test_split_certificates_keeps_order() {
        let bundle = format!("subject=leaf\n{LEAF}\n\nsubject=root\n{ROOT}\n");
        let blocks = split_certificates(&bundle);
        assert_eq!(blocks, vec![format!("{LEAF}\n"), format!("{ROOT}\n")]);
    }

    #[test]
    fn test_split_certificates_ignores_truncated_block() {
        let bundle = format!("{LEAF}\n-----BEGIN CERTIFICATE-----\nAAAA");
        assert_eq!(split_certificates(&bundle).len(), 1);
        assert!(split_certificates("").is_empty());
    }

    #[test]
    fn test_ensure_pem_wraps_bare_base64() {
        let body = "A".repeat(70);
        let pem = ensure_pem(&body);
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines[0], BEGIN_CERTIFICATE);
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines[2].len(), 6);
        assert_eq!(lines[3], END_CERTIFICATE);
        assert_eq!(ensure_pem(LEAF), format!("{LEAF}\n"));
    }
}
