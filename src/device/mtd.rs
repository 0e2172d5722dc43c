//! MTD character device backend
//!
//! Drives `/dev/mtdN` through the kernel's MTD ioctl interface.
//!
//! ## Control Requests
//! ```text
//! MEMGETINFO         _IOR('M', 1,  struct mtd_info_user)   0x80204d01
//! MEMERASE           _IOW('M', 2,  struct erase_info_user) 0x40084d02
//! OTPSELECT          _IOR('M', 13, int)                    0x80044d0d
//! OTPGETREGIONCOUNT  _IOW('M', 14, int)                    0x40044d0e
//! OTPGETREGIONINFO   _IOW('M', 15, struct otp_info)        0x400c4d0f
//! ```
//! strace decodes these as MTRR requests; the numbers above are the ones to
//! look for.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::RestrictedMode;

use super::{Area, FlashDevice, Geometry, Region};

// =============================================================================
// Kernel ABI
// =============================================================================

const MEMGETINFO: u32 = 0x8020_4d01;
const MEMERASE: u32 = 0x4008_4d02;
const OTPSELECT: u32 = 0x8004_4d0d;
const OTPGETREGIONCOUNT: u32 = 0x4004_4d0e;
const OTPGETREGIONINFO: u32 = 0x400c_4d0f;

const MTD_OTP_OFF: libc::c_int = 0;
const MTD_OTP_FACTORY: libc::c_int = 1;
const MTD_OTP_USER: libc::c_int = 2;

#[repr(C)]
#[derive(Debug, Default)]
struct MtdInfoUser {
    kind: u8,
    flags: u32,
    size: u32,
    erasesize: u32,
    writesize: u32,
    oobsize: u32,
    padding: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct EraseInfoUser {
    start: u32,
    length: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct OtpInfo {
    start: u32,
    length: u32,
    locked: u32,
}

// =============================================================================
// Device
// =============================================================================

/// An opened MTD character device
pub struct MtdDevice {
    file: File,
    path: PathBuf,
    restricted_mode: RestrictedMode,
}

impl MtdDevice {
    /// Open the device for reading and writing
    pub fn open(path: &Path, restricted_mode: RestrictedMode) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(path = %path.display(), "opened MTD device");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            restricted_mode,
        })
    }

    /// Path the device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn otp_mode(&self) -> libc::c_int {
        match self.restricted_mode {
            RestrictedMode::Factory => MTD_OTP_FACTORY,
            RestrictedMode::User => MTD_OTP_USER,
        }
    }

    fn ioctl<T>(&self, request: u32, arg: *mut T) -> io::Result<libc::c_int> {
        // SAFETY: the fd is owned by `self.file` and stays open for the call;
        // every caller passes a pointer to a live `#[repr(C)]` value whose
        // layout matches what the kernel expects for `request`.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }

    fn select_mode(&self, mut mode: libc::c_int) -> io::Result<()> {
        self.ioctl(OTPSELECT, &mut mode as *mut libc::c_int).map(|_| ())
    }
}

impl FlashDevice for MtdDevice {
    fn geometry(&mut self) -> io::Result<Geometry> {
        let mut info = MtdInfoUser::default();
        self.ioctl(MEMGETINFO, &mut info as *mut MtdInfoUser)?;
        debug!(
            kind = info.kind,
            flags = info.flags,
            size = info.size,
            erasesize = info.erasesize,
            writesize = info.writesize,
            "MEMGETINFO"
        );
        Ok(Geometry {
            size: u64::from(info.size),
            erase_size: info.erasesize,
            write_size: info.writesize,
        })
    }

    fn restricted_regions(&mut self) -> io::Result<Vec<Region>> {
        self.select_mode(self.otp_mode())?;

        let mut count: libc::c_int = 0;
        let result = self.ioctl(OTPGETREGIONCOUNT, &mut count as *mut libc::c_int);
        let regions: io::Result<Vec<Region>> = match result {
            Ok(_) if count > 0 => {
                let mut infos = vec![OtpInfo::default(); count as usize];
                self.ioctl(OTPGETREGIONINFO, infos.as_mut_ptr())
                    .map(|_| {
                        infos
                            .iter()
                            .map(|i| Region::new(u64::from(i.start), u64::from(i.length)))
                            .collect()
                    })
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) => Err(e),
        };

        // Always drop back to the normal area, even when the query failed.
        self.select_mode(MTD_OTP_OFF)?;
        regions
    }

    fn select_area(&mut self, area: Area) -> io::Result<()> {
        let mode = match area {
            Area::Normal => MTD_OTP_OFF,
            Area::Restricted => self.otp_mode(),
        };
        self.select_mode(mode)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    fn erase(&mut self, offset: u64, len: u64) -> io::Result<()> {
        let to_u32 = |v: u64| {
            u32::try_from(v).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "erase range exceeds 32 bits")
            })
        };
        let mut info = EraseInfoUser {
            start: to_u32(offset)?,
            length: to_u32(len)?,
        };
        self.ioctl(MEMERASE, &mut info as *mut EraseInfoUser).map(|_| ())
    }
}
