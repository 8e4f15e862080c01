//! Pod model: container specifications, manifest loading, templating,
//! and the dependency graph.

pub mod graph;
pub mod manifest;
pub mod spec;
pub mod template;

pub use graph::DependencyGraph;
pub use manifest::{load, Pod};
pub use spec::{
    ContainerSpec, DesiredState, ExposedPort, NetMode, ObservedContainer, ObservedState,
    ObservedStatus, PortBinding, RestartPolicy, VolumeSpec,
};
pub use template::{SubstitutionRenderer, TemplateRenderer, VariableBag};
