//! Prints the Issuer and ClusterIssuer CRD manifests as a multi-document YAML stream.

use std::process::ExitCode;

use crds::Scheme;

fn main() -> ExitCode {
    let scheme = match Scheme::with_defaults() {
        Ok(scheme) => scheme,
        Err(e) => {
            eprintln!("failed to build scheme: {e}");
            return ExitCode::FAILURE;
        }
    };

    for crd in scheme.crds() {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => print!("---\n{yaml}"),
            Err(e) => {
                eprintln!("failed to serialize CRD: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
