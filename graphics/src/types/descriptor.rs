//! Descriptors of the GPU resources tracked by the registry.

/// Image format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth16Unorm,
    Depth32Float,
    Depth24PlusStencil8,
    Depth32FloatStencil8,
}

impl ImageFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth32Float
                | Self::Depth24PlusStencil8
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format carries a stencil aspect.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }
}

/// 3D extent (width, height, depth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    /// 1 for 2D images.
    pub depth: u32,
}

impl Extent3d {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }
}

/// Descriptor for an image resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub format: ImageFormat,
    pub extent: Extent3d,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl ImageDescriptor {
    /// Create a 2D image descriptor with a single mip level and layer.
    pub fn new_2d(width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            label: None,
            format,
            extent: Extent3d::new_2d(width, height),
            mip_levels: 1,
            array_layers: 1,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }
}

/// Descriptor for a buffer resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

impl BufferDescriptor {
    pub fn new(size: u64) -> Self {
        Self { label: None, size }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Semantic type of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Buffer,
}

/// Descriptor of any tracked resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDescriptor {
    Image(ImageDescriptor),
    Buffer(BufferDescriptor),
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Image(_) => ResourceKind::Image,
            Self::Buffer(_) => ResourceKind::Buffer,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Image(desc) => desc.label.as_deref(),
            Self::Buffer(desc) => desc.label.as_deref(),
        }
    }

    /// Image format, or `None` for buffers.
    pub fn format(&self) -> Option<ImageFormat> {
        match self {
            Self::Image(desc) => Some(desc.format),
            Self::Buffer(_) => None,
        }
    }
}

impl From<ImageDescriptor> for ResourceDescriptor {
    fn from(desc: ImageDescriptor) -> Self {
        Self::Image(desc)
    }
}

impl From<BufferDescriptor> for ResourceDescriptor {
    fn from(desc: BufferDescriptor) -> Self {
        Self::Buffer(desc)
    }
}
