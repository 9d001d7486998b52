//! Print the ControlPlane CRD as YAML

use kube::CustomResourceExt;
use mesh_operator::ControlPlane;

fn main() -> Result<(), serde_yaml::Error> {
    let crd = serde_yaml::to_string(&ControlPlane::crd())?;
    println!("{crd}");
    Ok(())
}
