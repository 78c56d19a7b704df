use std::fs;
use std::io::Result;
use std::path::{Path, PathBuf};

#[cfg(any(target_os = "android", test))]
const ANDROID_PACKAGE: &str = "de.fotox.uploader";

/// Where Android keeps an app's private files when the context is unavailable
#[cfg(any(target_os = "android", test))]
fn android_package_dirs(package: &str) -> [PathBuf; 2] {
    [
        PathBuf::from(format!("/data/user/0/{}/files", package)),
        PathBuf::from(format!("/data/data/{}/files", package)),
    ]
}

#[cfg(target_os = "android")]
mod android {
    use jni::objects::{JObject, JString};
    use jni::{JNIEnv, JavaVM};
    use std::path::PathBuf;

    /// Calls a no-argument Java method that returns an object
    fn call_getter<'local>(
        env: &mut JNIEnv<'local>,
        target: &JObject<'_>,
        name: &str,
        signature: &str,
    ) -> Option<JObject<'local>> {
        env.call_method(target, name, signature, &[]).ok()?.l().ok()
    }

    /// `getFilesDir().getAbsolutePath()` of the hosting activity
    pub fn files_dir() -> Option<PathBuf> {
        let ctx = ndk_context::android_context();
        // SAFETY: ndk-context holds the process VM and a global ref to the activity
        let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }.ok()?;
        let activity = unsafe { JObject::from_raw(ctx.context().cast()) };
        let mut env = vm.attach_current_thread().ok()?;

        let dir = call_getter(&mut env, &activity, "getFilesDir", "()Ljava/io/File;")?;
        let path = call_getter(&mut env, &dir, "getAbsolutePath", "()Ljava/lang/String;")?;
        let path: String = env.get_string(&JString::from(path)).ok()?.into();
        Some(PathBuf::from(path))
    }
}

/// Application-private data directory (queue file, settings)
pub fn get_app_data_dir() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        if let Some(dir) = android::files_dir() {
            return dir;
        }
        if let Some(dir) = android_package_dirs(ANDROID_PACKAGE)
            .into_iter()
            .find(|d| d.exists())
        {
            return dir;
        }
        log::warn!("No Android files dir for {}, using ./data", ANDROID_PACKAGE);
    }

    PathBuf::from("./data")
}

/// Media files directly inside `dir`, sorted by name (capture order)
pub fn capture_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && upload_queue::classify(path).is_some())
        .collect();
    files.sort();
    Ok(files)
}
