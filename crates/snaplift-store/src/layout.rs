use crate::StoreError;

/// Extract `(tablet_id, schema_hash)` from a local snapshot or tablet path.
///
/// Local tablet directories always end in `.../<tablet_id>/<schema_hash>`,
/// so the last two path components are parsed as unsigned integers. Too few
/// components, a trailing separator, or a non-numeric segment is a
/// [`StoreError::PathParse`].
pub fn tablet_id_and_schema_hash_from_path(path: &str) -> Result<(u64, u32), StoreError> {
    let malformed = || StoreError::PathParse(path.to_owned());

    if path.is_empty() || path.ends_with('/') {
        return Err(malformed());
    }

    let mut components = path.rsplit('/');
    let schema_hash_str = components.next().ok_or_else(malformed)?;
    let tablet_id_str = components.next().ok_or_else(malformed)?;

    let schema_hash: u32 = schema_hash_str.parse().map_err(|_| malformed())?;
    let tablet_id: u64 = tablet_id_str.parse().map_err(|_| malformed())?;

    tracing::debug!("got tablet id {tablet_id}, schema hash {schema_hash} from path {path}");
    Ok((tablet_id, schema_hash))
}

/// Extract the tablet id from a remote snapshot path.
///
/// Remote tablet directories end in `..._<tablet_id>`; the segment after the
/// last underscore is parsed. Remote layouts with underscores inside the
/// trailing segment would misparse here; that split rule is part of the
/// remote path contract.
pub fn tablet_id_from_remote_path(remote_path: &str) -> Result<u64, StoreError> {
    let (_, id_str) = remote_path
        .rsplit_once('_')
        .ok_or_else(|| StoreError::PathParse(remote_path.to_owned()))?;
    id_str
        .parse()
        .map_err(|_| StoreError::PathParse(remote_path.to_owned()))
}

/// Rewrite the tablet id embedded in a snapshot file name.
///
/// Header files are named `<tablet_id>.hdr` and must be renamed when a
/// snapshot is retargeted to another tablet. Rowset files (`.idx`, `.dat`)
/// keep their names; the tablet id inside their contents is rewritten by the
/// storage engine, not here. Any other suffix is rejected.
pub fn rewrite_tablet_id(file_name: &str, tablet_id: u64) -> Result<String, StoreError> {
    if file_name.ends_with(".hdr") {
        Ok(format!("{tablet_id}.hdr"))
    } else if file_name.ends_with(".idx") || file_name.ends_with(".dat") {
        Ok(file_name.to_owned())
    } else {
        Err(StoreError::InvalidFileName(file_name.to_owned()))
    }
}
