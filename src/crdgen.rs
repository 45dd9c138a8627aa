//! CRD generation binary
//!
//! Prints the `PostgreSQL` CustomResourceDefinition manifest, for piping into
//! `kubectl apply -f -`.

use kube::CustomResourceExt;
use postgres_operator::crd::PostgreSQL;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&PostgreSQL::crd())?);
    Ok(())
}
