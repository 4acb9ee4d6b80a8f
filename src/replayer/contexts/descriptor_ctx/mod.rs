pub mod views;

use color_eyre::Result;
use crate::replayer::contexts::descriptor_ctx::views::{ViewInstall, ViewKind};
use crate::replayer::contexts::resource_ctx::ResourceRegistry;
use crate::replayer::device::{ReplayDevice, TableSizes};
use crate::replayer::error::ReplayError;
use crate::replayer::workload::WorkloadDocument;

/// Slot counts for both tables: one past the highest declared offset, at least 1.
pub fn table_sizes(document: &WorkloadDocument) -> TableSizes {
    let resources = document
        .srvs
        .iter()
        .map(|v| v.heap_offset)
        .chain(document.uavs.iter().map(|v| v.heap_offset))
        .chain(document.cbvs.iter().map(|v| v.heap_offset))
        .map(|offset| offset.saturating_add(1))
        .max()
        .unwrap_or(1);
    let samplers = document
        .samplers
        .iter()
        .map(|v| v.heap_offset.saturating_add(1))
        .max()
        .unwrap_or(1);

    TableSizes { resources, samplers }
}

/// Records that the resource will be accessed through a view of `kind` for the rest of the
/// run. Returns the resource's index in the registry.
pub fn claim_state<D: ReplayDevice>(
    registry: &mut ResourceRegistry<D>,
    name: &str,
    kind: ViewKind,
) -> Result<usize, ReplayError> {
    let index = registry.position(name)?;
    let Some(required) = kind.required_state() else {
        return Ok(index);
    };

    let resource = registry.find_mut(name)?;
    match resource.execution_state {
        Some(committed) if committed != required => {
            log::error!(
                "Mismatch in resource state required by {:?} view of \"{}\": committed to {:?}",
                kind,
                name,
                committed,
            );
            Err(ReplayError::StateConflict {
                resource: name.to_string(),
                requested: kind,
                committed,
                required,
            })
        }
        _ => {
            resource.execution_state = Some(required);
            Ok(index)
        }
    }
}

/// Builds both descriptor tables and installs every declared view, in SRV, UAV, CBV,
/// sampler order.
pub struct DescriptorBinder<D: ReplayDevice> {
    pub tables: D::Tables,
    pub sizes: TableSizes,
}

impl<D: ReplayDevice> DescriptorBinder<D> {
    pub fn new(
        device: &D,
        document: &WorkloadDocument,
        registry: &mut ResourceRegistry<D>,
    ) -> Result<Self> {
        let sizes = table_sizes(document);
        let mut tables = device.create_tables(sizes)?;

        for decl in &document.srvs {
            let index = claim_state(registry, &decl.resource, ViewKind::ShaderResource)?;
            let target = registry.get(index);
            let desc = views::srv_desc(decl, target.desc.format)?;
            Self::install(device, &mut tables, decl.heap_offset, &decl.resource, ViewInstall::ShaderResource {
                target: &target.allocation,
                desc,
            })?;
        }

        for decl in &document.uavs {
            let index = claim_state(registry, &decl.resource, ViewKind::UnorderedAccess)?;
            let counter = decl
                .counter_resource
                .as_deref()
                .map(|counter| claim_state(registry, counter, ViewKind::Counter))
                .transpose()?;

            let target = registry.get(index);
            let desc = views::uav_desc(decl, target.desc.format)?;
            Self::install(device, &mut tables, decl.heap_offset, &decl.resource, ViewInstall::UnorderedAccess {
                target: &target.allocation,
                desc,
            })?;

            if let Some(counter) = counter {
                let counter = registry.get(counter);
                Self::install(device, &mut tables, decl.heap_offset, &counter.name, ViewInstall::Counter {
                    target: &counter.allocation,
                    offset: decl.counter_offset,
                })?;
            }
        }

        for decl in &document.cbvs {
            let index = claim_state(registry, &decl.resource, ViewKind::ConstantBuffer)?;
            let target = registry.get(index);
            let end = decl.buffer_location.checked_add(decl.size_in_bytes);
            if target.desc.is_buffer() && end.is_none_or(|end| end > target.desc.width) {
                return Err(ReplayError::config(
                    format!("CBV of \"{}\"", decl.resource),
                    format!(
                        "range {}+{} exceeds Width {}",
                        decl.buffer_location, decl.size_in_bytes, target.desc.width,
                    ),
                ).into());
            }
            Self::install(device, &mut tables, decl.heap_offset, &decl.resource, ViewInstall::ConstantBuffer {
                target: &target.allocation,
                offset: decl.buffer_location,
                size: decl.size_in_bytes,
            })?;
        }

        for decl in &document.samplers {
            let desc = views::sampler_desc(decl);
            Self::install(device, &mut tables, decl.heap_offset, "sampler", ViewInstall::Sampler(desc))?;
        }

        log::info!(
            "Installed {} resource views and {} samplers ({} + {} slots)",
            document.srvs.len() + document.uavs.len() + document.cbvs.len(),
            document.samplers.len(),
            sizes.resources,
            sizes.samplers,
        );

        Ok(Self { tables, sizes })
    }

    fn install(
        device: &D,
        tables: &mut D::Tables,
        slot: u32,
        name: &str,
        view: ViewInstall<'_, D::Allocation>,
    ) -> Result<()> {
        let kind = view.kind();
        device.install_view(tables, slot, view).map_err(|e| {
            log::error!("Failed to install {:?} view of \"{}\" at slot {}: {:?}", kind, name, slot, e);
            ReplayError::creation(name, "view", e).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replayer::contexts::resource_ctx::resource::ResidencyState;
    use crate::replayer::device::mock::{Event, MockDevice};
    use crate::replayer::workload::parse_document;

    fn setup(views: &str) -> (MockDevice, WorkloadDocument, ResourceRegistry<MockDevice>) {
        let device = MockDevice::new();
        let document = parse_document(&format!(r#"{{
            "CS": "k.spv", "RootSignature": "l.bin",
            "Resources": [
                {{ "name": "a", "Width": 256, "Flags": 4 }},
                {{ "name": "b", "Width": 256 }},
                {{ "name": "counter", "Width": 4 }}
            ],
            {}
            "RootParameters": [], "Dispatch": [1, 1, 1]
        }}"#, views)).unwrap();
        let registry = ResourceRegistry::load(
            &device,
            &document.resources,
            |_: &str| -> Result<Vec<u8>> { unreachable!() },
        ).unwrap();
        (device, document, registry)
    }

    fn binder_error(result: Result<DescriptorBinder<MockDevice>>) -> ReplayError {
        match result {
            Ok(_) => panic!("expected binder failure"),
            Err(e) => e.downcast::<ReplayError>().unwrap(),
        }
    }

    #[test]
    fn table_sizes_cover_highest_offset() {
        let (_, document, _) = setup(r#"
            "SRV": [ { "Resource": "b", "HeapOffset": 3, "ViewDimension": "BUFFER" } ],
            "UAV": [ { "Resource": "a", "HeapOffset": 7, "ViewDimension": "BUFFER" } ],
            "Sampler": [ { "HeapOffset": 2, "Filter": "ANISOTROPIC" } ],
        "#);
        assert_eq!(table_sizes(&document), TableSizes { resources: 8, samplers: 3 });

        let (_, empty, _) = setup("");
        assert_eq!(table_sizes(&empty), TableSizes { resources: 1, samplers: 1 });
    }

    #[test]
    fn views_commit_execution_state() {
        let (device, document, mut registry) = setup(r#"
            "SRV": [ { "Resource": "b", "HeapOffset": 0, "ViewDimension": "BUFFER" } ],
            "UAV": [ { "Resource": "a", "HeapOffset": 1, "ViewDimension": "BUFFER", "CounterResource": "counter" } ],
            "CBV": [ { "Resource": "b", "HeapOffset": 2, "SizeInBytes": 256 } ],
        "#);
        let log = device.log();
        DescriptorBinder::new(&device, &document, &mut registry).unwrap();

        assert_eq!(registry.find("a").unwrap().execution_state(), Some(ResidencyState::UnorderedAccess));
        assert_eq!(registry.find("b").unwrap().execution_state(), Some(ResidencyState::ShaderRead));
        assert_eq!(registry.find("counter").unwrap().execution_state(), Some(ResidencyState::UnorderedAccess));

        let installs = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::InstallView { .. }))
            .collect::<Vec<_>>();
        assert_eq!(installs, vec![
            Event::InstallView { slot: 0, kind: ViewKind::ShaderResource },
            Event::InstallView { slot: 1, kind: ViewKind::UnorderedAccess },
            Event::InstallView { slot: 1, kind: ViewKind::Counter },
            Event::InstallView { slot: 2, kind: ViewKind::ConstantBuffer },
        ]);
    }

    #[test]
    fn constant_buffer_view_of_unordered_resource_conflicts() {
        let (device, document, mut registry) = setup(r#"
            "UAV": [ { "Resource": "a", "HeapOffset": 0, "ViewDimension": "BUFFER" } ],
            "CBV": [ { "Resource": "a", "HeapOffset": 1, "SizeInBytes": 256 } ],
        "#);
        let err = binder_error(DescriptorBinder::new(&device, &document, &mut registry));
        match err {
            ReplayError::StateConflict { resource, requested, committed, required } => {
                assert_eq!(resource, "a");
                assert_eq!(requested, ViewKind::ConstantBuffer);
                assert_eq!(committed, ResidencyState::UnorderedAccess);
                assert_eq!(required, ResidencyState::ShaderRead);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn constant_buffer_ranges_must_fit_the_buffer() {
        let (device, document, mut registry) = setup(r#"
            "CBV": [ { "Resource": "b", "HeapOffset": 0, "BufferLocation": 18446744073709551615, "SizeInBytes": 256 } ],
        "#);
        let err = binder_error(DescriptorBinder::new(&device, &document, &mut registry));
        assert!(matches!(err, ReplayError::Config { ref message, .. } if message.contains("exceeds Width")));

        let (device, document, mut registry) = setup(r#"
            "CBV": [ { "Resource": "b", "HeapOffset": 0, "BufferLocation": 256, "SizeInBytes": 256 } ],
        "#);
        let err = binder_error(DescriptorBinder::new(&device, &document, &mut registry));
        assert!(matches!(err, ReplayError::Config { .. }));
    }

    #[test]
    fn counter_resource_conflicts_with_read_views() {
        let (device, document, mut registry) = setup(r#"
            "SRV": [ { "Resource": "counter", "HeapOffset": 0, "ViewDimension": "BUFFER" } ],
            "UAV": [ { "Resource": "a", "HeapOffset": 1, "ViewDimension": "BUFFER", "CounterResource": "counter" } ],
        "#);
        let err = binder_error(DescriptorBinder::new(&device, &document, &mut registry));
        assert!(matches!(err, ReplayError::StateConflict { ref resource, .. } if resource == "counter"));
    }

    #[test]
    fn views_of_unknown_resources_fail() {
        let (device, document, mut registry) = setup(r#"
            "SRV": [ { "Resource": "ghost", "HeapOffset": 0, "ViewDimension": "BUFFER" } ],
        "#);
        let err = binder_error(DescriptorBinder::new(&device, &document, &mut registry));
        assert!(matches!(err, ReplayError::NotFound(ref name) if name == "ghost"));
    }

    #[test]
    fn unknown_view_dimension_is_a_config_error() {
        let (device, document, mut registry) = setup(r#"
            "SRV": [ { "Resource": "b", "HeapOffset": 0, "ViewDimension": "TEXTURE5D" } ],
        "#);
        let err = binder_error(DescriptorBinder::new(&device, &document, &mut registry));
        assert!(matches!(err, ReplayError::Config { .. }));
    }

    #[test]
    fn repeated_compatible_views_are_accepted() {
        let (_, _, mut registry) = setup("");
        claim_state(&mut registry, "b", ViewKind::ShaderResource).unwrap();
        claim_state(&mut registry, "b", ViewKind::ConstantBuffer).unwrap();
        claim_state(&mut registry, "b", ViewKind::Sampler).unwrap();
        assert_eq!(registry.find("b").unwrap().execution_state(), Some(ResidencyState::ShaderRead));
    }
}
