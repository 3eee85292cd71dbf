//! Label value normalization.

/// Map an absent value to `""`.
///
/// Every label value goes through here before it reaches the registry, so an
/// absent field and an empty field always land on the same sample.
#[inline]
pub fn sanitize(value: Option<&str>) -> String {
    value.unwrap_or_default().to_owned()
}
