pub mod config;
pub mod contexts;
pub mod device;
pub mod error;
pub mod profiler;
pub mod vk;
pub mod workload;

use color_eyre::Result;
use crate::replayer::contexts::descriptor_ctx::DescriptorBinder;
use crate::replayer::contexts::frame_ctx::{FramePipeline, IterationInputs};
use crate::replayer::contexts::pipeline_ctx::{DispatchPlan, PipelineState};
use crate::replayer::contexts::resource_ctx::ResourceRegistry;
use crate::replayer::device::ReplayDevice;
use crate::replayer::profiler::{Profiler, RunSummary};
use crate::replayer::workload::Workload;

/// A loaded workload, ready to be submitted repeatedly.
pub struct Replayer<D: ReplayDevice> {
    // Dropped in declaration order; the device goes last.
    frm: FramePipeline<D>,
    bnd: DescriptorBinder<D>,
    pip: PipelineState<D>,
    res: ResourceRegistry<D>,
    plan: DispatchPlan,
    prof: Profiler,

    finished: bool,
    dev: D,
}

impl<D: ReplayDevice> Replayer<D> {
    /// Creates every resource, installs every view, resolves the root parameters and
    /// compiles the kernel. Any failure aborts before the first submission.
    pub fn load(dev: D, workload: &Workload) -> Result<Self> {
        let mut res = ResourceRegistry::load(&dev, &workload.document.resources, |path| {
            workload.read_data(path)
        })?;
        let bnd = DescriptorBinder::new(&dev, &workload.document, &mut res)?;
        let plan = DispatchPlan::resolve(&dev, workload, &mut res)?;
        let pip = PipelineState::new(&dev, workload, &bnd.tables)?;
        let frm = FramePipeline::new(&dev)?;

        Ok(Self {
            frm,
            bnd,
            pip,
            res,
            plan,
            prof: Profiler::new(),
            finished: false,
            dev,
        })
    }

    pub fn execute_iteration(&mut self, dispatches: u32) -> Result<()> {
        let inputs = IterationInputs {
            registry: &mut self.res,
            binder: &self.bnd,
            pipeline: &self.pip,
            plan: &self.plan,
            profiler: &mut self.prof,
        };
        self.frm.execute(&mut self.dev, inputs, dispatches)
    }

    /// Waits for the last submission and reports what the profiler has drained so far.
    pub fn finish(&mut self) -> Result<RunSummary> {
        self.frm.finish(&self.dev)?;
        self.finished = true;

        let summary = self.prof.summary(self.dev.timestamp_frequency());
        log::info!(
            "Finished after {} iterations, {} dispatches timed",
            self.frm.iteration(),
            summary.total_dispatches,
        );
        Ok(summary)
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn resources(&self) -> &ResourceRegistry<D> {
        &self.res
    }

    pub fn frames(&self) -> &FramePipeline<D> {
        &self.frm
    }

    pub fn plan(&self) -> &DispatchPlan {
        &self.plan
    }

    pub fn profiler(&self) -> &Profiler {
        &self.prof
    }
}

impl<D: ReplayDevice> Drop for Replayer<D> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.frm.finish(&self.dev) {
                log::error!("Failed waiting for the device before teardown: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use tempfile::TempDir;
    use super::*;
    use crate::replayer::contexts::frame_ctx::frame::FrameState;
    use crate::replayer::contexts::pipeline_ctx::RootBinding;
    use crate::replayer::contexts::resource_ctx::resource::ResidencyState;
    use crate::replayer::device::mock::{Event, MockDevice, MockLog, TICK_DELTA};
    use crate::replayer::device::CopyMode;
    use crate::replayer::error::ReplayError;
    use crate::replayer::workload::layout::{BindingLayout, ParameterKind, RootViewKind, TableKind};

    const KERNEL: [u32; 5] = [0x0723_0203, 0x0001_0300, 0, 1, 0];

    const TABLE_ONLY: &[ParameterKind] = &[ParameterKind::Table(TableKind::Resources)];

    const SINGLE_UAV: &str = r#"{
        "CS": "kernel.spv", "RootSignature": "layout.bin",
        "Resources": [ { "name": "buf", "Width": 64, "Flags": 4, "data": ["buf.bin"] } ],
        "UAV": [ { "Resource": "buf", "HeapOffset": 0, "ViewDimension": "BUFFER", "NumElements": 16, "Flags": "RAW" } ],
        "RootParameters": [ { "type": "ResourceTable", "index": 0, "offset": 0 } ],
        "Dispatch": [1, 1, 1]
    }"#;

    const READ_AND_WRITE: &str = r#"{
        "CS": "kernel.spv", "RootSignature": "layout.bin",
        "Resources": [
            { "name": "src", "Width": 64, "data": ["buf.bin"] },
            { "name": "dst", "Width": 64, "Flags": 4 }
        ],
        "SRV": [ { "Resource": "src", "HeapOffset": 0, "ViewDimension": "BUFFER", "NumElements": 16, "Flags": "RAW" } ],
        "UAV": [ { "Resource": "dst", "HeapOffset": 1, "ViewDimension": "BUFFER", "NumElements": 16, "Flags": "RAW" } ],
        "RootParameters": [ { "type": "ResourceTable", "index": 0, "offset": 0 } ],
        "Dispatch": [4, 2, 1]
    }"#;

    fn ramp() -> Vec<u8> {
        (0..64).collect()
    }

    fn write_workload(json: &str, layout: &[ParameterKind]) -> (TempDir, Workload) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("workload.json"), json).unwrap();
        fs::write(dir.path().join("kernel.spv"), bytemuck::cast_slice::<u32, u8>(&KERNEL)).unwrap();
        let layout = BindingLayout { parameters: layout.to_vec() };
        fs::write(dir.path().join("layout.bin"), layout.to_bytes()).unwrap();
        fs::write(dir.path().join("buf.bin"), ramp()).unwrap();

        let workload = Workload::load(&dir.path().join("workload.json")).unwrap();
        (dir, workload)
    }

    fn load(device: MockDevice, json: &str, layout: &[ParameterKind]) -> (TempDir, MockLog, Replayer<MockDevice>) {
        let (dir, workload) = write_workload(json, layout);
        let log = device.log();
        let replayer = Replayer::load(device, &workload).unwrap();
        log.clear();
        (dir, log, replayer)
    }

    fn load_error(json: &str, layout: &[ParameterKind]) -> ReplayError {
        let (_dir, workload) = write_workload(json, layout);
        match Replayer::load(MockDevice::new(), &workload) {
            Ok(_) => panic!("expected load failure"),
            Err(e) => e.downcast::<ReplayError>().unwrap(),
        }
    }

    fn position(events: &[Event], wanted: &Event) -> usize {
        events
            .iter()
            .position(|e| e == wanted)
            .unwrap_or_else(|| panic!("{:?} was never recorded", wanted))
    }

    #[test]
    fn batch_run_bounds_in_flight_work_to_two_iterations() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        for _ in 0..4 {
            replayer.execute_iteration(1).unwrap();
        }
        let summary = replayer.finish().unwrap();
        let events = log.events();

        let submits = events
            .iter()
            .filter_map(|e| match e {
                Event::Submit { slot, signal_value } => Some((*slot, *signal_value)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(submits, vec![(0, 1), (1, 2), (0, 3), (1, 4)]);

        let waits = events
            .iter()
            .filter_map(|e| match e {
                Event::Wait { value } => Some(*value),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(waits, vec![1, 2, 4]);

        // Never more than one wait between two submissions.
        for window in events.split(|e| matches!(e, Event::Submit { .. })) {
            assert!(window.iter().filter(|e| matches!(e, Event::Wait { .. })).count() <= 1);
        }

        // The last two iterations are never drained.
        assert_eq!(summary.total_dispatches, 2);
        assert_eq!(summary.total_ticks, 2 * TICK_DELTA);
        let us = summary.per_dispatch_us.unwrap();
        assert!((us - TICK_DELTA as f64).abs() < 1e-9);
    }

    #[test]
    fn initial_data_is_resident_after_first_iteration() {
        let (_dir, _log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(1).unwrap();

        let buf = replayer.resources().find("buf").unwrap();
        assert_eq!(*buf.allocation.bytes.borrow(), ramp());
        assert_eq!(buf.current_state(), ResidencyState::UnorderedAccess);
        assert!(buf.shadow.is_none());
    }

    #[test]
    fn texture_data_is_resident_per_subresource() {
        let json = r#"{
            "CS": "kernel.spv", "RootSignature": "layout.bin",
            "Resources": [
                { "name": "buf", "Width": 64, "Flags": 4, "data": ["buf.bin"] },
                {
                    "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8G8B8A8_UNORM",
                    "Width": 4, "Height": 4, "DepthOrArraySize": 2, "MipLevels": 2, "PixelSize": 4,
                    "data": ["tex0.bin", "tex1.bin"]
                },
                {
                    "name": "depth", "Dimension": "TEXTURE2D", "Format": "R32G8X24_TYPELESS", "Flags": 2,
                    "Width": 2, "Height": 2, "PixelSize": 8, "PixelSlice": 4, "data": ["ds.bin"]
                }
            ],
            "UAV": [ { "Resource": "buf", "HeapOffset": 0, "ViewDimension": "BUFFER", "NumElements": 16, "Flags": "RAW" } ],
            "RootParameters": [ { "type": "ResourceTable", "index": 0, "offset": 0 } ],
            "Dispatch": [1, 1, 1]
        }"#;
        let (dir, workload) = write_workload(json, TABLE_ONLY);
        fs::write(dir.path().join("tex0.bin"), [vec![0x10; 64], vec![0x11; 64]].concat()).unwrap();
        fs::write(dir.path().join("tex1.bin"), [vec![0x20; 16], vec![0x21; 16]].concat()).unwrap();
        fs::write(dir.path().join("ds.bin"), [[1u8, 2, 3, 4, 0xAA, 0xBB, 0xCC, 0xDD]; 4].concat()).unwrap();

        let device = MockDevice::new();
        let log = device.log();
        let mut replayer = Replayer::load(device, &workload).unwrap();
        replayer.execute_iteration(1).unwrap();

        let tex = &replayer.resources().find("tex").unwrap().allocation;
        assert_eq!(tex.subresource(0, 0), Some(vec![0x10; 64]));
        assert_eq!(tex.subresource(0, 1), Some(vec![0x11; 64]));
        assert_eq!(tex.subresource(1, 0), Some(vec![0x20; 16]));
        assert_eq!(tex.subresource(1, 1), Some(vec![0x21; 16]));

        let depth = &replayer.resources().find("depth").unwrap().allocation;
        assert_eq!(depth.subresource(0, 0), Some([[1u8, 2, 3, 4]; 4].concat()));

        let events = log.events();
        assert!(events.contains(&Event::CopyBufferToAllocation { name: "tex".to_string(), mode: CopyMode::Full }));
        assert!(events.contains(&Event::CopyBufferToAllocation {
            name: "depth".to_string(),
            mode: CopyMode::PerSubresource,
        }));
    }

    #[test]
    fn first_sync_moves_resources_out_of_undefined() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(1).unwrap();

        let buf_events = log
            .events()
            .into_iter()
            .filter(|e| match e {
                Event::Transition { name, .. } | Event::CopyBufferToAllocation { name, .. } => name == "buf",
                _ => false,
            })
            .collect::<Vec<_>>();
        assert_eq!(buf_events, vec![
            Event::Transition {
                name: "buf".to_string(),
                before: ResidencyState::Undefined,
                after: ResidencyState::CopyDest,
            },
            Event::CopyBufferToAllocation { name: "buf".to_string(), mode: CopyMode::Full },
            Event::Transition {
                name: "buf".to_string(),
                before: ResidencyState::CopyDest,
                after: ResidencyState::UnorderedAccess,
            },
        ]);
    }

    #[test]
    fn unordered_resources_resync_before_every_dispatch() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), READ_AND_WRITE, TABLE_ONLY);
        replayer.execute_iteration(3).unwrap();
        let events = log.events();

        let copies = |wanted: &str| {
            events
                .iter()
                .filter(|e| matches!(e, Event::CopyBufferToAllocation { name, .. } if name == wanted))
                .count()
        };
        assert_eq!(copies("dst"), 3);
        assert_eq!(copies("src"), 1);

        // Host data reaches the mirrors exactly once.
        assert_eq!(events.iter().filter(|e| matches!(e, Event::CopyHostToBuffer { .. })).count(), 2);
        assert_eq!(events.iter().filter(|e| matches!(e, Event::Dispatch([4, 2, 1]))).count(), 3);

        let dst = replayer.resources().find("dst").unwrap();
        assert!(dst.is_dirty());
        assert!(!replayer.resources().find("src").unwrap().is_dirty());

        // Second and third dispatches start from the unordered state, not Undefined.
        let resyncs = events
            .iter()
            .filter(|e| matches!(e, Event::Transition { name, before: ResidencyState::UnorderedAccess, .. } if name == "dst"))
            .count();
        assert_eq!(resyncs, 2);
    }

    #[test]
    fn shadows_are_released_only_after_the_fence_wait() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(1).unwrap();
        assert_eq!(replayer.frames().frame(0).consumed_shadow_count(), 1);

        replayer.execute_iteration(1).unwrap();
        let release = Event::ReleaseHostBuffer { name: "buf staging".to_string() };
        assert!(!log.events().contains(&release));

        replayer.execute_iteration(1).unwrap();
        let events = log.events();
        assert!(position(&events, &Event::Wait { value: 1 }) < position(&events, &release));
        assert!(position(&events, &release) < position(&events, &Event::Submit { slot: 0, signal_value: 3 }));
        assert_eq!(replayer.frames().frame(0).consumed_shadow_count(), 0);
    }

    #[test]
    fn presentable_is_cleared_after_the_last_dispatch_and_presented_after_submit() {
        let (_dir, log, mut replayer) = load(MockDevice::with_surface(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(2).unwrap();
        let events = log.events();

        let resolve = position(&events, &Event::ResolveTimestamps { count: 4 });
        let clear = position(&events, &Event::ClearPresentable { slot: 0 });
        let submit = position(&events, &Event::Submit { slot: 0, signal_value: 1 });
        let present = position(&events, &Event::Present { slot: 0 });
        assert!(resolve < clear && clear < submit && submit < present);
    }

    #[test]
    fn batch_run_never_touches_presentation() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(1).unwrap();
        assert!(!log.events().iter().any(|e| matches!(e, Event::ClearPresentable { .. } | Event::Present { .. })));
    }

    #[test]
    fn retiring_drains_what_the_slot_submitted() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        for dispatches in [1, 1, 3, 3, 3] {
            replayer.execute_iteration(dispatches).unwrap();
        }

        // Slot 0 grew its timestamp storage when it went from 1 to 3 dispatches, once its
        // first submission had completed.
        let events = log.events();
        let release = Event::ReleaseHostBuffer { name: "frame 0 timestamps".to_string() };
        assert!(position(&events, &Event::Wait { value: 1 }) < position(&events, &release));
        assert!(position(&events, &release) < position(&events, &Event::Submit { slot: 0, signal_value: 3 }));
        assert!(events.contains(&Event::ResetQueries { count: 6 }));

        assert_eq!(replayer.profiler().total_dispatches(), 1 + 1 + 3);
        assert_eq!(replayer.frames().frame(0).pending_timestamps(), 3);
        assert_eq!(replayer.frames().frame(0).state(), FrameState::Submitted);
    }

    #[test]
    fn timestamps_bracket_each_dispatch() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(2).unwrap();

        let recorded = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Timestamp { .. } | Event::Dispatch(_) | Event::GlobalBarrier))
            .collect::<Vec<_>>();
        assert_eq!(recorded, vec![
            Event::Timestamp { query: 0 },
            Event::Dispatch([1, 1, 1]),
            Event::Timestamp { query: 1 },
            Event::GlobalBarrier,
            Event::Timestamp { query: 2 },
            Event::Dispatch([1, 1, 1]),
            Event::Timestamp { query: 3 },
            Event::GlobalBarrier,
        ]);
    }

    #[test]
    fn root_views_resolve_to_device_addresses() {
        let json = r#"{
            "CS": "kernel.spv", "RootSignature": "layout.bin",
            "Resources": [ { "name": "buf", "Width": 64, "Flags": 4 } ],
            "UAV": [ { "Resource": "buf", "HeapOffset": 2, "ViewDimension": "BUFFER", "NumElements": 16, "Flags": "RAW" } ],
            "RootParameters": [
                { "type": "ResourceTable", "index": 0, "offset": 2 },
                { "type": "UAV", "index": 1, "offset": 16, "Resource": "buf" }
            ],
            "Dispatch": [1, 1, 1]
        }"#;
        let layout = [
            ParameterKind::Table(TableKind::Resources),
            ParameterKind::Root(RootViewKind::UnorderedAccess),
        ];
        let (_dir, log, mut replayer) = load(MockDevice::new(), json, &layout);

        let base = replayer
            .device()
            .resource_address(&replayer.resources().find("buf").unwrap().allocation)
            .unwrap();
        assert_eq!(replayer.plan().bindings, vec![
            RootBinding::Table { index: 0, table: TableKind::Resources, offset: 2 },
            RootBinding::Address { index: 1, kind: RootViewKind::UnorderedAccess, address: base + 16 },
        ]);

        replayer.execute_iteration(1).unwrap();
        assert!(log.events().contains(&Event::SetRootAddress {
            index: 1,
            kind: RootViewKind::UnorderedAccess,
            address: base + 16,
        }));
    }

    #[test]
    fn root_parameters_must_match_the_layout() {
        let json = |kind: &str| format!(r#"{{
            "CS": "kernel.spv", "RootSignature": "layout.bin",
            "Resources": [ {{ "name": "buf", "Width": 64 }} ],
            "RootParameters": [ {{ "type": "{}", "index": 0, "offset": 0, "Resource": "buf" }} ],
            "Dispatch": [1, 1, 1]
        }}"#, kind);

        assert!(matches!(load_error(&json("Foo"), TABLE_ONLY), ReplayError::Config { .. }));
        assert!(matches!(load_error(&json("SRV"), TABLE_ONLY), ReplayError::Config { .. }));

        let srv = [ParameterKind::Root(RootViewKind::ShaderResource)];
        assert!(matches!(load_error(&json("SamplerTable"), &srv), ReplayError::Config { .. }));

        let past_the_address_space = json("SRV").replace(r#""offset": 0"#, r#""offset": 18446744073709551615"#);
        assert!(matches!(load_error(&past_the_address_space, &srv), ReplayError::Config { .. }));
    }

    #[test]
    fn root_views_join_the_state_commitment() {
        let json = r#"{
            "CS": "kernel.spv", "RootSignature": "layout.bin",
            "Resources": [ { "name": "buf", "Width": 64, "Flags": 4 } ],
            "UAV": [ { "Resource": "buf", "HeapOffset": 0, "ViewDimension": "BUFFER", "NumElements": 16, "Flags": "RAW" } ],
            "RootParameters": [ { "type": "CBV", "index": 0, "offset": 0, "Resource": "buf" } ],
            "Dispatch": [1, 1, 1]
        }"#;
        let cbv = [ParameterKind::Root(RootViewKind::ConstantBuffer)];
        let err = load_error(json, &cbv);
        assert!(matches!(err, ReplayError::StateConflict { ref resource, .. } if resource == "buf"));
    }

    #[test]
    fn dropping_an_unfinished_replayer_waits_for_the_device() {
        let (_dir, log, mut replayer) = load(MockDevice::new(), SINGLE_UAV, TABLE_ONLY);
        replayer.execute_iteration(1).unwrap();
        drop(replayer);
        assert!(log.events().contains(&Event::Wait { value: 1 }));
    }
}
