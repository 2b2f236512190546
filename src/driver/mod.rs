//! Driver layer: device capability presets and the compiled-program cache.
//!
//! Generation itself is single-threaded; this layer is what several threads
//! share. [`compile_kernel`] generates a kernel for a device and hands the
//! text to a [`ProgramCache`].

pub mod cache;
pub mod device;

pub use cache::{
    BinaryCompiler, CacheError, CacheKey, CacheLookup, CacheLookupSource, CacheResult,
    ProgramCache, TextImageCompiler,
};
pub use device::Device;

use crate::il::GeneratorOptions;
use crate::kernels::{self, Kernel};

/// Generate `kernel` for `device` and fetch or compile its binary.
pub fn compile_kernel<C: BinaryCompiler>(
    cache: &ProgramCache<C>,
    kernel: &Kernel,
    device: &Device,
    options: &GeneratorOptions,
) -> CacheResult<CacheLookup> {
    let generated = kernels::generate(kernel, Some(device.query()), options)?;
    cache.get_or_compile(&generated.program.text(), device)
}
