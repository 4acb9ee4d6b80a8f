use ash::vk;
use crate::replayer::contexts::resource_ctx::upload::StagingLayout;
use crate::replayer::device::ReplayDevice;
use crate::replayer::workload::tokens::Dimension;

/// Synchronization stage a device allocation is valid for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResidencyState {
    /// Contents are undefined; nothing has been written yet.
    Undefined,
    Common,
    CopyDest,
    CopySource,
    ShaderRead,
    UnorderedAccess,
}

impl ResidencyState {
    pub fn permits_unordered_writes(self) -> bool {
        self == Self::UnorderedAccess
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub render_target: bool,
    pub depth_stencil: bool,
    pub unordered_access: bool,
}

/// What the device needs to know to create the GPU-resident form of a resource.
#[derive(Clone, Debug)]
pub struct AllocationDesc {
    pub dimension: Dimension,
    /// Resident format. `UNDEFINED` for buffers.
    pub format: vk::Format,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub usage: ResourceUsage,
}

impl AllocationDesc {
    pub fn is_buffer(&self) -> bool {
        self.dimension == Dimension::Buffer
    }

    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            Dimension::Texture1D | Dimension::Texture2D => self.depth_or_array_size,
            _ => 1,
        }
    }

    pub fn depth(&self) -> u32 {
        match self.dimension {
            Dimension::Texture3D => self.depth_or_array_size,
            _ => 1,
        }
    }
}

/// A named resource: the GPU-resident allocation, its host-visible staging shadow,
/// and the device-local mirror the shadow is first copied into.
pub struct Resource<D: ReplayDevice> {
    pub name: String,
    pub desc: AllocationDesc,
    pub staging: StagingLayout,

    pub allocation: D::Allocation,
    pub mirror: D::Buffer,
    /// Released once the submission that copied it into the mirror has retired.
    pub shadow: Option<D::HostBuffer>,

    // Only the frame pipeline's sync pass moves these.
    pub(crate) current_state: ResidencyState,
    pub(crate) mirror_state: ResidencyState,

    /// Unset until a view claims the resource.
    pub(crate) execution_state: Option<ResidencyState>,

    pub(crate) dirty: bool,
    pub(crate) dirty_gpu_staging: bool,
}

impl<D: ReplayDevice> Resource<D> {
    pub fn current_state(&self) -> ResidencyState {
        self.current_state
    }

    pub fn execution_state(&self) -> Option<ResidencyState> {
        self.execution_state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_gpu_staging_dirty(&self) -> bool {
        self.dirty_gpu_staging
    }

    /// State the allocation is left in after each sync.
    pub fn target_state(&self) -> ResidencyState {
        self.execution_state.unwrap_or(ResidencyState::Common)
    }

    /// True when staging data must be reinterpreted per subresource on its way in.
    pub fn needs_per_subresource_copy(&self) -> bool {
        !self.desc.is_buffer() && self.staging.format != self.desc.format
    }
}
