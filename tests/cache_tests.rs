//! Program cache behaviour under concurrent callers and across restarts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use ilgen::driver::{
    self, BinaryCompiler, CacheKey, CacheLookupSource, CacheResult, Device, ProgramCache,
    TextImageCompiler,
};
use ilgen::il::GeneratorOptions;
use ilgen::kernels;

/// Slow compiler that counts its invocations.
#[derive(Default)]
struct CountingCompiler {
    calls: AtomicUsize,
}

impl BinaryCompiler for CountingCompiler {
    fn compile(&self, source: &str, device: &Device) -> CacheResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        Ok(format!("{}:{}", device.name, source.len()).into_bytes())
    }
}

const SOURCE: &str = "il_cs_2_0\ndcl_num_thread_per_group 64\nend\n";

#[test]
fn test_racing_callers_compile_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cache = ProgramCache::new(CountingCompiler::default());
    let threads = 8;
    let barrier = Barrier::new(threads);

    let sources: Vec<CacheLookupSource> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache.get_or_compile(SOURCE, &Device::CYPRESS).unwrap().source
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let compiled = sources
        .iter()
        .filter(|s| **s == CacheLookupSource::Compiled)
        .count();
    assert_eq!(compiled, 1, "{sources:?}");
    assert!(sources
        .iter()
        .all(|s| matches!(s, CacheLookupSource::Compiled | CacheLookupSource::Memory)));
    assert_eq!(cache.compilations(), 1);
    assert_eq!(cache.len().unwrap(), 1);
}

#[test]
fn test_late_caller_waits_then_hits() {
    let cache = ProgramCache::new(CountingCompiler::default());
    let started = Barrier::new(2);

    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| {
            started.wait();
            cache.get_or_compile(SOURCE, &Device::RV770).unwrap()
        });
        let second = s.spawn(|| {
            started.wait();
            // Arrive while the first caller is still compiling.
            thread::sleep(Duration::from_millis(10));
            cache.get_or_compile(SOURCE, &Device::RV770).unwrap()
        });
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(cache.compilations(), 1);
    assert_eq!(first.key, second.key);
    assert_eq!(first.binary, second.binary);
    let sources = [first.source, second.source];
    assert!(sources.contains(&CacheLookupSource::Compiled));
    assert!(sources.contains(&CacheLookupSource::Memory));
}

#[test]
fn test_devices_do_not_share_entries() {
    let cache = ProgramCache::new(CountingCompiler::default());
    let a = cache.get_or_compile(SOURCE, &Device::CYPRESS).unwrap();
    let b = cache.get_or_compile(SOURCE, &Device::CAYMAN).unwrap();
    assert_ne!(a.key, b.key);
    assert_eq!(a.source, CacheLookupSource::Compiled);
    assert_eq!(b.source, CacheLookupSource::Compiled);
    assert_eq!(cache.compilations(), 2);
}

#[test]
fn test_disk_mirror_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let cache = ProgramCache::with_dir(TextImageCompiler, dir.path()).unwrap();
    let first = cache.get_or_compile(SOURCE, &Device::CAYMAN).unwrap();
    assert_eq!(first.source, CacheLookupSource::Compiled);
    let path = dir.path().join(format!("{}.bin", first.key.to_hex()));
    assert_eq!(std::fs::read(&path).unwrap(), SOURCE.as_bytes());

    cache.clear_memory().unwrap();
    assert!(cache.is_empty().unwrap());
    let again = cache.get_or_compile(SOURCE, &Device::CAYMAN).unwrap();
    assert_eq!(again.source, CacheLookupSource::Disk);
    assert_eq!(cache.compilations(), 1);

    let restarted = ProgramCache::with_dir(CountingCompiler::default(), dir.path()).unwrap();
    let lookup = restarted.get_or_compile(SOURCE, &Device::CAYMAN).unwrap();
    assert_eq!(lookup.source, CacheLookupSource::Disk);
    assert_eq!(&*lookup.binary, SOURCE.as_bytes());
    assert_eq!(restarted.compilations(), 0);
}

#[test]
fn test_compile_kernel_keys_by_generated_text() {
    let cache = ProgramCache::new(TextImageCompiler);
    let kernel = kernels::find("rsqrt_f64").unwrap();
    let options = GeneratorOptions::default();

    let native = driver::compile_kernel(&cache, kernel, &Device::CAYMAN, &options).unwrap();
    let emulated = driver::compile_kernel(&cache, kernel, &Device::CYPRESS, &options).unwrap();
    assert_ne!(native.binary, emulated.binary);

    let native_text = std::str::from_utf8(&native.binary).unwrap();
    let emulated_text = std::str::from_utf8(&emulated.binary).unwrap();
    assert!(native_text.contains("drsq"), "{native_text}");
    assert!(!emulated_text.contains("drsq"), "{emulated_text}");
    assert_eq!(native.key, CacheKey::new(native_text, &Device::CAYMAN));

    let hit = driver::compile_kernel(&cache, kernel, &Device::CAYMAN, &options).unwrap();
    assert_eq!(hit.source, CacheLookupSource::Memory);
    assert_eq!(cache.compilations(), 2);
}
