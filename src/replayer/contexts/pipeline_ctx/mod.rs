use color_eyre::Result;
use crate::replayer::contexts::descriptor_ctx::{self, views::ViewKind};
use crate::replayer::contexts::resource_ctx::ResourceRegistry;
use crate::replayer::device::ReplayDevice;
use crate::replayer::error::ReplayError;
use crate::replayer::workload::layout::{BindingLayout, ParameterKind, RootViewKind, TableKind};
use crate::replayer::workload::Workload;

/// The compiled kernel and the layout it was compiled against.
pub struct PipelineState<D: ReplayDevice> {
    pub pipeline: D::Pipeline,
    pub layout: BindingLayout,
}

impl<D: ReplayDevice> PipelineState<D> {
    pub fn new(device: &D, workload: &Workload, tables: &D::Tables) -> Result<Self> {
        let pipeline = device
            .create_pipeline(&workload.kernel, &workload.layout, &workload.document.entry_point, tables)
            .map_err(|e| ReplayError::creation(&workload.document.kernel, "compute pipeline", e))?;

        Ok(Self {
            pipeline,
            layout: workload.layout.clone(),
        })
    }
}

/// A declared root parameter, resolved against the layout and the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootBinding {
    Table {
        index: u32,
        table: TableKind,
        offset: u32,
    },
    Address {
        index: u32,
        kind: RootViewKind,
        address: u64,
    },
}

/// Everything recorded per dispatch after the sync pass.
#[derive(Clone, Debug)]
pub struct DispatchPlan {
    pub bindings: Vec<RootBinding>,
    pub groups: [u32; 3],
}

impl DispatchPlan {
    pub fn resolve<D: ReplayDevice>(
        device: &D,
        workload: &Workload,
        registry: &mut ResourceRegistry<D>,
    ) -> Result<Self> {
        let bindings = workload
            .document
            .root_parameters
            .iter()
            .map(|param| {
                let context = format!("root parameter {}", param.index);
                let kind = ParameterKind::from_token(&param.kind).ok_or_else(|| {
                    log::error!("Unrecognized root parameter type \"{}\"", param.kind);
                    ReplayError::config(&context, format!("unknown type \"{}\"", param.kind))
                })?;

                match workload.layout.kind(param.index) {
                    Some(declared) if declared == kind => {}
                    Some(declared) => {
                        return Err(ReplayError::config(
                            context,
                            format!("declared as {:?} but the layout has {:?}", kind, declared),
                        ).into());
                    }
                    None => {
                        return Err(ReplayError::config(
                            context,
                            format!("outside layout of {} parameters", workload.layout.parameters.len()),
                        ).into());
                    }
                }

                Self::resolve_binding(device, registry, param.index, kind, param.offset, param.resource.as_deref(), &context)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bindings,
            groups: workload.document.dispatch,
        })
    }

    fn resolve_binding<D: ReplayDevice>(
        device: &D,
        registry: &mut ResourceRegistry<D>,
        index: u32,
        kind: ParameterKind,
        offset: u64,
        resource: Option<&str>,
        context: &str,
    ) -> Result<RootBinding> {
        let kind = match kind {
            ParameterKind::Table(table) => {
                let offset = u32::try_from(offset).map_err(|_| {
                    ReplayError::config(context, format!("table offset {} out of range", offset))
                })?;
                return Ok(RootBinding::Table { index, table, offset });
            }
            ParameterKind::Root(kind) => kind,
        };

        let name = resource.ok_or_else(|| ReplayError::missing_field(context, "Resource"))?;
        let view = match kind {
            RootViewKind::ShaderResource => ViewKind::ShaderResource,
            RootViewKind::UnorderedAccess => ViewKind::UnorderedAccess,
            RootViewKind::ConstantBuffer => ViewKind::ConstantBuffer,
        };
        let position = descriptor_ctx::claim_state(registry, name, view)?;
        let target = registry.get(position);
        if !target.desc.is_buffer() {
            return Err(ReplayError::config(context, format!("\"{}\" is not a buffer", name)).into());
        }

        let base = device
            .resource_address(&target.allocation)
            .map_err(|e| ReplayError::creation(name, "device address", e))?;

        let address = base.checked_add(offset).ok_or_else(|| {
            ReplayError::config(context, format!("offset {} overflows the address of \"{}\"", offset, name))
        })?;

        Ok(RootBinding::Address { index, kind, address })
    }

    pub fn record<D: ReplayDevice>(
        &self,
        device: &D,
        cmd: &mut D::CommandList,
        pipeline: &PipelineState<D>,
        tables: &D::Tables,
    ) -> Result<()> {
        device.bind_pipeline(cmd, &pipeline.pipeline);
        device.bind_tables(cmd, &pipeline.pipeline, tables)?;
        for binding in &self.bindings {
            match *binding {
                RootBinding::Table { index, table, offset } => {
                    device.set_table(cmd, &pipeline.pipeline, index, table, offset)?;
                }
                RootBinding::Address { index, kind, address } => {
                    device.set_root_address(cmd, &pipeline.pipeline, index, kind, address)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replayer::device::mock::{Event, MockDevice, MockPipeline};
    use crate::replayer::device::TableSizes;

    fn state(parameters: Vec<ParameterKind>) -> PipelineState<MockDevice> {
        let layout = BindingLayout { parameters };
        PipelineState {
            pipeline: MockPipeline { push_constant_size: layout.push_constant_size() },
            layout,
        }
    }

    #[test]
    fn recording_binds_every_root_parameter() {
        let device = MockDevice::new();
        let log = device.log();
        let mut cmd = device.create_command_list(0).unwrap();
        let pipeline = state(vec![
            ParameterKind::Table(TableKind::Resources),
            ParameterKind::Root(RootViewKind::ShaderResource),
        ]);
        let plan = DispatchPlan {
            bindings: vec![
                RootBinding::Table { index: 0, table: TableKind::Resources, offset: 4 },
                RootBinding::Address { index: 1, kind: RootViewKind::ShaderResource, address: 0x2000 },
            ],
            groups: [1, 1, 1],
        };

        plan.record(&device, &mut cmd, &pipeline, &TableSizes { resources: 8, samplers: 1 }).unwrap();
        assert_eq!(log.events(), vec![
            Event::BindPipeline,
            Event::BindTables,
            Event::SetTable { index: 0, table: TableKind::Resources, offset: 4 },
            Event::SetRootAddress { index: 1, kind: RootViewKind::ShaderResource, address: 0x2000 },
        ]);
    }

    #[test]
    fn parameters_outside_the_pipeline_layout_fail_recording() {
        let device = MockDevice::new();
        let log = device.log();
        let mut cmd = device.create_command_list(0).unwrap();
        let pipeline = state(vec![ParameterKind::Table(TableKind::Resources)]);
        let plan = DispatchPlan {
            bindings: vec![RootBinding::Table { index: 1, table: TableKind::Samplers, offset: 0 }],
            groups: [1, 1, 1],
        };

        let err = plan
            .record(&device, &mut cmd, &pipeline, &TableSizes { resources: 1, samplers: 1 })
            .unwrap_err()
            .downcast::<ReplayError>()
            .unwrap();
        assert!(matches!(err, ReplayError::Execution { stage: "root parameters", .. }));
        assert!(!log.events().iter().any(|e| matches!(e, Event::SetTable { .. })));
    }
}
