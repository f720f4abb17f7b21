use crate::memory::error::Error;
use crate::memory::Protection;
use nix::unistd::Pid;
use proc_maps::MapRange;

/// Return protection flags of the mapping that holds `[address, address + len)`.
pub(super) fn protection_at(pid: Pid, address: usize, len: usize) -> Result<Protection, Error> {
    let maps: Vec<MapRange> =
        proc_maps::get_process_maps(pid.as_raw()).map_err(|source| Error::Maps { pid, source })?;

    let region = maps
        .iter()
        .find(|map| map.start() <= address && address - map.start() < map.size())
        .ok_or(Error::Unmapped(address))?;

    let region_end = region.start() + region.size();
    match address.checked_add(len) {
        Some(end) if end <= region_end => {}
        _ => return Err(Error::RegionBoundary { address, len }),
    }

    Ok(Protection {
        read: region.is_read(),
        write: region.is_write(),
        exec: region.is_exec(),
    })
}
