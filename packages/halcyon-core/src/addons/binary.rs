//! Loading and driving binary (shared object) add-ons.
//!
//! A binary add-on exports one C symbol, `halcyon_addon_entry`, which
//! fills in an [`AddonInterface`] vtable. The host validates the API
//! version and the required function pointers, then creates instances
//! through the vtable. Instance calls take `&mut self`, so a handle is
//! driven from one thread at a time; the handle keeps the shared object
//! mapped for as long as it lives.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use thiserror::Error;

/// ABI version this build speaks.
pub const HALCYON_ADDON_API_VERSION: u32 = 1;

/// Errors from loading or driving a binary add-on.
#[derive(Debug, Error)]
pub enum BinaryAddonError {
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("entry point halcyon_addon_entry missing: {0}")]
    MissingEntry(libloading::Error),

    #[error("entry point returned status {0}")]
    EntryFailed(i32),

    #[error("add-on speaks ABI v{got}, this build speaks v{expected}")]
    ApiMismatch { expected: u32, got: u32 },

    #[error("add-on vtable lacks the {0} function")]
    MissingFunction(&'static str),

    #[error("create returned no instance")]
    CreateFailed,

    #[error("start returned status {0}")]
    StartFailed(i32),

    #[error("string contains an interior nul byte")]
    Nul(#[from] std::ffi::NulError),
}

/// Startup properties handed to `create`, C-compatible layout.
#[repr(C)]
pub struct RawAddonProps {
    pub name: *const c_char,
    pub profile_path: *const c_char,
}

/// Owned startup properties. Holds the C strings the raw view points at.
pub struct AddonProps {
    name: CString,
    profile_path: CString,
}

impl AddonProps {
    pub fn new(name: &str, profile_path: &Path) -> Result<Self, BinaryAddonError> {
        Ok(Self {
            name: CString::new(name)?,
            profile_path: CString::new(profile_path.to_string_lossy().as_bytes())?,
        })
    }

    fn raw(&self) -> RawAddonProps {
        RawAddonProps {
            name: self.name.as_ptr(),
            profile_path: self.profile_path.as_ptr(),
        }
    }
}

/// Vtable filled in by the add-on's entry point.
///
/// `create` and `destroy` are mandatory; the rest may stay null and the
/// corresponding host calls become no-ops.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct AddonInterface {
    pub api_version: u32,
    pub create: Option<unsafe extern "C" fn(props: *const RawAddonProps) -> *mut c_void>,
    pub start: Option<
        unsafe extern "C" fn(
            handle: *mut c_void,
            channels: c_int,
            samples_per_sec: c_int,
            name: *const c_char,
        ) -> c_int,
    >,
    pub stop: Option<unsafe extern "C" fn(handle: *mut c_void)>,
    pub render: Option<unsafe extern "C" fn(handle: *mut c_void)>,
    pub audio_data: Option<unsafe extern "C" fn(handle: *mut c_void, data: *const f32, len: usize)>,
    pub destroy: Option<unsafe extern "C" fn(handle: *mut c_void)>,
}

fn validate_interface(interface: &AddonInterface) -> Result<(), BinaryAddonError> {
    if interface.api_version != HALCYON_ADDON_API_VERSION {
        return Err(BinaryAddonError::ApiMismatch {
            expected: HALCYON_ADDON_API_VERSION,
            got: interface.api_version,
        });
    }
    if interface.create.is_none() {
        return Err(BinaryAddonError::MissingFunction("create"));
    }
    if interface.destroy.is_none() {
        return Err(BinaryAddonError::MissingFunction("destroy"));
    }
    Ok(())
}

/// A loaded binary add-on, ready to create instances.
pub struct BinaryAddon {
    library: Arc<Library>,
    interface: AddonInterface,
    path: PathBuf,
}

impl BinaryAddon {
    /// Loads the shared object at `path` and negotiates the vtable.
    pub fn load(path: &Path) -> Result<Self, BinaryAddonError> {
        // SAFETY: loading a shared object runs its initializers. The path
        // comes from an installed add-on tree the user enabled.
        let library = unsafe { Library::new(path) }.map_err(|source| BinaryAddonError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let mut interface = AddonInterface::default();
        // SAFETY: the entry point has the documented C signature and the
        // vtable it writes into outlives the call.
        let status = unsafe {
            let entry: Symbol<'_, unsafe extern "C" fn(*mut AddonInterface) -> i32> = library
                .get(b"halcyon_addon_entry")
                .map_err(BinaryAddonError::MissingEntry)?;
            entry(&mut interface)
        };
        if status != 0 {
            return Err(BinaryAddonError::EntryFailed(status));
        }
        validate_interface(&interface)?;

        log::info!("[Addons] Loaded binary add-on {}", path.display());
        Ok(Self {
            library: Arc::new(library),
            interface,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create_visualization(
        &self,
        props: &AddonProps,
    ) -> Result<Visualization, BinaryAddonError> {
        Ok(Visualization {
            inner: self.create_handle(props)?,
        })
    }

    pub fn create_screensaver(&self, props: &AddonProps) -> Result<Screensaver, BinaryAddonError> {
        Ok(Screensaver {
            inner: self.create_handle(props)?,
        })
    }

    fn create_handle(&self, props: &AddonProps) -> Result<AddonHandle, BinaryAddonError> {
        let create = self
            .interface
            .create
            .ok_or(BinaryAddonError::MissingFunction("create"))?;
        let raw = props.raw();
        // SAFETY: create was provided by a validated vtable and the
        // property strings outlive the call.
        let handle = unsafe { create(&raw) };
        if handle.is_null() {
            return Err(BinaryAddonError::CreateFailed);
        }
        Ok(AddonHandle {
            handle,
            interface: self.interface,
            _library: Arc::clone(&self.library),
            started: false,
            destroyed: false,
        })
    }
}

/// One live add-on instance.
///
/// Destroyed exactly once, on drop at the latest.
struct AddonHandle {
    handle: *mut c_void,
    interface: AddonInterface,
    _library: Arc<Library>,
    started: bool,
    destroyed: bool,
}

// SAFETY: all instance calls take &mut self, so the add-on sees one
// thread at a time; the raw handle itself is just moved between threads.
unsafe impl Send for AddonHandle {}

impl AddonHandle {
    fn start(
        &mut self,
        channels: c_int,
        samples_per_sec: c_int,
        name: &CStr,
    ) -> Result<(), BinaryAddonError> {
        let Some(start) = self.interface.start else {
            return Ok(());
        };
        // SAFETY: the handle came from create and has not been destroyed.
        let status = unsafe { start(self.handle, channels, samples_per_sec, name.as_ptr()) };
        if status != 0 {
            return Err(BinaryAddonError::StartFailed(status));
        }
        self.started = true;
        Ok(())
    }

    /// Stops a started instance. Extra calls are no-ops.
    fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        if let Some(stop) = self.interface.stop {
            // SAFETY: the handle is live and start succeeded earlier.
            unsafe { stop(self.handle) };
        }
    }

    fn render(&mut self) {
        if let Some(render) = self.interface.render {
            // SAFETY: the handle is live.
            unsafe { render(self.handle) };
        }
    }

    fn audio_data(&mut self, samples: &[f32]) {
        if let Some(audio_data) = self.interface.audio_data {
            // SAFETY: the pointer and length describe a slice that stays
            // borrowed for the duration of the call only.
            unsafe { audio_data(self.handle, samples.as_ptr(), samples.len()) };
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.stop();
        if let Some(destroy) = self.interface.destroy {
            // SAFETY: runs at most once per handle.
            unsafe { destroy(self.handle) };
        }
    }
}

impl Drop for AddonHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A music visualization instance.
pub struct Visualization {
    inner: AddonHandle,
}

impl Visualization {
    pub fn start(
        &mut self,
        channels: u32,
        samples_per_sec: u32,
        name: &str,
    ) -> Result<(), BinaryAddonError> {
        let name = CString::new(name)?;
        self.inner
            .start(channels as c_int, samples_per_sec as c_int, &name)
    }

    /// Feeds a block of interleaved PCM samples.
    pub fn audio_data(&mut self, samples: &[f32]) {
        self.inner.audio_data(samples);
    }

    pub fn render(&mut self) {
        self.inner.render();
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

/// A screensaver instance.
pub struct Screensaver {
    inner: AddonHandle,
}

impl Screensaver {
    pub fn start(&mut self, name: &str) -> Result<(), BinaryAddonError> {
        let name = CString::new(name)?;
        self.inner.start(0, 0, &name)
    }

    pub fn render(&mut self) {
        self.inner.render();
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    thread_local! {
        static CREATE_CALLS: Cell<usize> = const { Cell::new(0) };
        static START_CALLS: Cell<usize> = const { Cell::new(0) };
        static STOP_CALLS: Cell<usize> = const { Cell::new(0) };
        static DESTROY_CALLS: Cell<usize> = const { Cell::new(0) };
    }

    unsafe extern "C" fn fake_create(_props: *const RawAddonProps) -> *mut c_void {
        CREATE_CALLS.with(|c| c.set(c.get() + 1));
        // Opaque sentinel, never dereferenced
        1usize as *mut c_void
    }

    unsafe extern "C" fn fake_create_failing(_props: *const RawAddonProps) -> *mut c_void {
        std::ptr::null_mut()
    }

    unsafe extern "C" fn fake_start(
        _handle: *mut c_void,
        _channels: c_int,
        _samples_per_sec: c_int,
        _name: *const c_char,
    ) -> c_int {
        START_CALLS.with(|c| c.set(c.get() + 1));
        0
    }

    unsafe extern "C" fn fake_stop(_handle: *mut c_void) {
        STOP_CALLS.with(|c| c.set(c.get() + 1));
    }

    unsafe extern "C" fn fake_destroy(_handle: *mut c_void) {
        DESTROY_CALLS.with(|c| c.set(c.get() + 1));
    }

    fn fake_interface() -> AddonInterface {
        AddonInterface {
            api_version: HALCYON_ADDON_API_VERSION,
            create: Some(fake_create),
            start: Some(fake_start),
            stop: Some(fake_stop),
            render: None,
            audio_data: None,
            destroy: Some(fake_destroy),
        }
    }

    #[test]
    fn interface_validation_checks_version_and_required_functions() {
        assert!(validate_interface(&fake_interface()).is_ok());

        let stale = AddonInterface {
            api_version: 99,
            ..fake_interface()
        };
        assert!(matches!(
            validate_interface(&stale),
            Err(BinaryAddonError::ApiMismatch { got: 99, .. })
        ));

        let no_create = AddonInterface {
            create: None,
            ..fake_interface()
        };
        assert!(matches!(
            validate_interface(&no_create),
            Err(BinaryAddonError::MissingFunction("create"))
        ));

        let no_destroy = AddonInterface {
            destroy: None,
            ..fake_interface()
        };
        assert!(matches!(
            validate_interface(&no_destroy),
            Err(BinaryAddonError::MissingFunction("destroy"))
        ));
    }

    #[cfg(unix)]
    mod lifecycle {
        use super::*;

        fn addon_with(interface: AddonInterface) -> BinaryAddon {
            BinaryAddon {
                library: Arc::new(Library::from(libloading::os::unix::Library::this())),
                interface,
                path: PathBuf::from("fake.so"),
            }
        }

        fn props() -> AddonProps {
            AddonProps::new("test", Path::new("/tmp/profile")).unwrap()
        }

        #[test]
        fn create_failure_is_reported() {
            let addon = addon_with(AddonInterface {
                create: Some(fake_create_failing),
                ..fake_interface()
            });
            assert!(matches!(
                addon.create_visualization(&props()),
                Err(BinaryAddonError::CreateFailed)
            ));
        }

        #[test]
        fn stop_is_idempotent() {
            let addon = addon_with(fake_interface());
            let mut vis = addon.create_visualization(&props()).unwrap();

            vis.start(2, 44_100, "song.flac").unwrap();
            vis.stop();
            vis.stop();

            assert_eq!(START_CALLS.with(Cell::get), 1);
            assert_eq!(STOP_CALLS.with(Cell::get), 1);
        }

        #[test]
        fn drop_destroys_once_and_stops_an_active_instance() {
            let addon = addon_with(fake_interface());
            {
                let mut saver = addon.create_screensaver(&props()).unwrap();
                saver.start("idle").unwrap();
            }

            assert_eq!(CREATE_CALLS.with(Cell::get), 1);
            assert_eq!(STOP_CALLS.with(Cell::get), 1);
            assert_eq!(DESTROY_CALLS.with(Cell::get), 1);
        }

        #[test]
        fn missing_optional_functions_are_no_ops() {
            let addon = addon_with(AddonInterface {
                start: None,
                stop: None,
                ..fake_interface()
            });
            let mut vis = addon.create_visualization(&props()).unwrap();

            vis.start(2, 48_000, "song").unwrap();
            vis.audio_data(&[0.0, 0.1]);
            vis.render();
            vis.stop();

            assert_eq!(STOP_CALLS.with(Cell::get), 0);
        }

        #[test]
        fn interior_nul_in_name_is_rejected() {
            let addon = addon_with(fake_interface());
            let mut vis = addon.create_visualization(&props()).unwrap();
            assert!(matches!(
                vis.start(2, 44_100, "bad\0name"),
                Err(BinaryAddonError::Nul(_))
            ));
        }
    }
}
