//! # Resource States
//!
//! Access states a resource must occupy before being used a given way.
//!
//! A state is a bitset: several read states may be combined, while a write
//! state is always held alone. Two values are synthetic:
//!
//! - [`ResourceState::COMMON`] is the empty set (default, no access)
//! - [`ResourceState::INVALID`] marks an uninitialized slot and is never a
//!   valid transition target

bitflags::bitflags! {
    /// Resource access state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        /// Vertex or constant buffer reads
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        /// Index buffer reads
        const INDEX_BUFFER = 0x2;
        /// Render target writes
        const RENDER_TARGET = 0x4;
        /// Unordered (read-write) shader access
        const UNORDERED_ACCESS = 0x8;
        /// Depth writes
        const DEPTH_WRITE = 0x10;
        /// Depth reads
        const DEPTH_READ = 0x20;
        /// Shader reads outside the pixel stage
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        /// Shader reads in the pixel stage
        const PIXEL_SHADER_RESOURCE = 0x80;
        /// Stream output writes
        const STREAM_OUT = 0x100;
        /// Indirect argument reads
        const INDIRECT_ARGUMENT = 0x200;
        /// Copy destination
        const COPY_DEST = 0x400;
        /// Copy source
        const COPY_SOURCE = 0x800;
        /// Resolve destination
        const RESOLVE_DEST = 0x1000;
        /// Resolve source
        const RESOLVE_SOURCE = 0x2000;
        /// Ray tracing acceleration structure
        const RAYTRACING_ACCELERATION_STRUCTURE = 0x40_0000;
        /// Variable shading rate source
        const SHADING_RATE_SOURCE = 0x100_0000;
        /// Uninitialized marker
        const INVALID = 0x8000_0000;
    }
}

impl ResourceState {
    /// Default state, no access
    pub const COMMON: Self = Self::empty();

    /// Every read state combined
    pub const GENERIC_READ: Self = Self::VERTEX_AND_CONSTANT_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::NON_PIXEL_SHADER_RESOURCE)
        .union(Self::PIXEL_SHADER_RESOURCE)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::COPY_SOURCE);

    /// States readable by shaders
    pub const SHADER_RESOURCE: Self =
        Self::NON_PIXEL_SHADER_RESOURCE.union(Self::PIXEL_SHADER_RESOURCE);

    /// Depth states
    pub const DEPTH: Self = Self::DEPTH_WRITE.union(Self::DEPTH_READ);

    /// States that only read
    const READ_ONLY: Self = Self::GENERIC_READ
        .union(Self::DEPTH_READ)
        .union(Self::RESOLVE_SOURCE)
        .union(Self::SHADING_RATE_SOURCE);

    /// Check for the default state
    pub const fn is_common(self) -> bool {
        self.is_empty()
    }

    /// Check for the uninitialized marker
    pub const fn is_invalid(self) -> bool {
        self.contains(Self::INVALID)
    }

    /// Check if every bit is a read state
    pub const fn is_read_only(self) -> bool {
        !self.is_empty() && Self::READ_ONLY.contains(self)
    }

    /// Check if any bit is a write state
    pub const fn is_write(self) -> bool {
        !self.is_empty() && !Self::READ_ONLY.contains(self)
    }

    /// Check if holding `self` already satisfies a request for `requested`
    ///
    /// `COMMON` only satisfies `COMMON`, since every set contains the empty
    /// set.
    pub const fn satisfies(self, requested: Self) -> bool {
        if requested.is_empty() {
            self.is_empty()
        } else {
            self.contains(requested)
        }
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::COMMON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_only_satisfies_common() {
        assert!(ResourceState::COMMON.satisfies(ResourceState::COMMON));
        assert!(!ResourceState::COPY_DEST.satisfies(ResourceState::COMMON));
        assert!(!ResourceState::COMMON.satisfies(ResourceState::COPY_DEST));
    }

    #[test]
    fn test_generic_read_satisfies_reads() {
        let read = ResourceState::GENERIC_READ;
        assert!(read.satisfies(ResourceState::COPY_SOURCE));
        assert!(read.satisfies(ResourceState::NON_PIXEL_SHADER_RESOURCE));
        assert!(!read.satisfies(ResourceState::COPY_DEST));
    }

    #[test]
    fn test_read_write_classification() {
        assert!(ResourceState::COPY_SOURCE.is_read_only());
        assert!(ResourceState::GENERIC_READ.is_read_only());
        assert!(!ResourceState::COPY_DEST.is_read_only());
        assert!(ResourceState::UNORDERED_ACCESS.is_write());
        assert!(!ResourceState::COMMON.is_read_only());
        assert!(!ResourceState::COMMON.is_write());
        assert!(ResourceState::INVALID.is_invalid());
    }
}
