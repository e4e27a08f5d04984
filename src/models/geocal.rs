//! Geometric camera calibration from star cross-matches.
//!
//! Each cross-match pairs an observed source position `(u, v)` in the image with the
//! catalogue position `(ra, dec)` of the reference star it was identified as. The
//! fitter estimates the orientation of the camera frame (CAM) with respect to the local
//! topocentric South-East-Zenith frame (SEZ) and the pinhole intrinsics.
//!
//! # Transformation chain
//!
//! ```text
//! (ra, dec) ──► ECI unit vector ──► ECEF (rotate by GMST) ──► SEZ (site lon, lat)
//!           ──► CAM (inverse of q_sez_cam) ──► pinhole (fx, fy, cx, cy) ──► (u, v)
//! ```
//!
//! # Parameters
//!
//! `P = [q_w, q_x, q_y, q_z, f_x, f_y, c_x, c_y]`
//!
//! The quaternion is renormalised after every step. Only its direction matters to the
//! projection, so `JᵗWJ` is singular along the quaternion itself. The fitter reports
//! that direction as a gauge direction and the direct covariance is computed on the
//! three-dimensional tangent space of the unit sphere.
//!
//! # Jacobian
//!
//! With `q̂ = q/|q| = (w, v)` the CAM direction is
//! `r_cam = r − 2w·(v × r) + 2·v × (v × r)`, so
//!
//! ```text
//! ∂r_cam/∂w = −2·(v × r)
//! ∂r_cam/∂v = 2w·[r]ₓ + 2·((v·r)·I + v·rᵗ − 2·r·vᵗ)
//! ∂q̂/∂q     = (I − q̂·q̂ᵗ) / |q|
//! ```
//!
//! and the pinhole contributes `∂u/∂r_cam = (f_x/z, 0, −f_x·x/z²)`,
//! `∂v/∂r_cam = (0, f_y/z, −f_y·y/z²)`.

use nalgebra::{
    DMatrix, DVector, Matrix2x3, Matrix3, Matrix3x4, Matrix4, Quaternion, UnitQuaternion, Vector3,
    Vector4,
};

use super::{ModelError, ModelResult, ResidualModel};

/// An observed source identified with a catalogue star.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossMatch {
    /// Observed image position [pixels]
    pub u: f64,
    pub v: f64,
    /// Reference star right ascension [radians]
    pub ra: f64,
    /// Reference star declination [radians]
    pub dec: f64,
}

/// Pinhole projection parameters [pixels].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl PinholeIntrinsics {
    /// Project a CAM-frame direction. Directions at or behind the image plane give NaN.
    pub fn project(&self, r_cam: &Vector3<f64>) -> (f64, f64) {
        if r_cam.z <= 0.0 {
            return (f64::NAN, f64::NAN);
        }
        (
            self.fx * r_cam.x / r_cam.z + self.cx,
            self.fy * r_cam.y / r_cam.z + self.cy,
        )
    }
}

/// Unit vector for a right ascension / declination pair.
pub fn radec_to_unit(ra: f64, dec: f64) -> Vector3<f64> {
    let (sin_ra, cos_ra) = ra.sin_cos();
    let (sin_dec, cos_dec) = dec.sin_cos();
    Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
}

/// Right ascension in `[0, 2π)` and declination of a (not necessarily unit) vector.
pub fn unit_to_radec(r: &Vector3<f64>) -> (f64, f64) {
    let ra = r.y.atan2(r.x).rem_euclid(std::f64::consts::TAU);
    let dec = (r.z / r.norm()).asin();
    (ra, dec)
}

/// Rotation from the ECI frame to the SEZ frame of a site.
///
/// `gmst`, `lon` and `lat` are in radians, longitude positive east.
pub fn eci_to_sez(gmst: f64, lon: f64, lat: f64) -> Matrix3<f64> {
    let (sin_g, cos_g) = gmst.sin_cos();
    let eci_to_ecef = Matrix3::new(
        cos_g, sin_g, 0.0, //
        -sin_g, cos_g, 0.0, //
        0.0, 0.0, 1.0,
    );
    let (sin_lon, cos_lon) = lon.sin_cos();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let ecef_to_sez = Matrix3::new(
        sin_lat * cos_lon, sin_lat * sin_lon, -cos_lat, //
        -sin_lon, cos_lon, 0.0, //
        cos_lat * cos_lon, cos_lat * sin_lon, sin_lat,
    );
    ecef_to_sez * eci_to_ecef
}

/// Inverse of [`eci_to_sez`].
pub fn sez_to_eci(gmst: f64, lon: f64, lat: f64) -> Matrix3<f64> {
    eci_to_sez(gmst, lon, lat).transpose()
}

#[derive(Debug, Clone)]
pub struct GeoCalFitter {
    matches: Vec<CrossMatch>,
    /// Reference star directions in SEZ, fixed by the observation geometry.
    r_sez: Vec<Vector3<f64>>,
    gmst: f64,
    lon: f64,
    lat: f64,
}

impl GeoCalFitter {
    /// # Errors
    /// `ModelError::InvalidInput` if any cross-match or the site geometry is not finite.
    pub fn new(matches: Vec<CrossMatch>, gmst: f64, lon: f64, lat: f64) -> ModelResult<Self> {
        if ![gmst, lon, lat].iter().all(|v| v.is_finite()) {
            return Err(ModelError::InvalidInput(
                "GMST and site coordinates must be finite".to_string(),
            )
            .log());
        }
        if let Some(i) = matches
            .iter()
            .position(|m| ![m.u, m.v, m.ra, m.dec].iter().all(|v| v.is_finite()))
        {
            return Err(ModelError::InvalidInput(format!("cross-match {i} is not finite")).log());
        }

        let rotation = eci_to_sez(gmst, lon, lat);
        let r_sez = matches
            .iter()
            .map(|m| rotation * radec_to_unit(m.ra, m.dec))
            .collect();
        Ok(Self {
            matches,
            r_sez,
            gmst,
            lon,
            lat,
        })
    }

    pub fn matches(&self) -> &[CrossMatch] {
        &self.matches
    }

    pub fn site(&self) -> (f64, f64, f64) {
        (self.gmst, self.lon, self.lat)
    }

    /// Observed positions interleaved as `[u0, v0, u1, v1, ...]`.
    pub fn observations(&self) -> DVector<f64> {
        DVector::from_iterator(
            2 * self.matches.len(),
            self.matches.iter().flat_map(|m| [m.u, m.v]),
        )
    }

    /// Pack an orientation and intrinsics into a parameter vector.
    pub fn pack_parameters(
        q_sez_cam: &UnitQuaternion<f64>,
        intrinsics: &PinholeIntrinsics,
    ) -> DVector<f64> {
        let q = q_sez_cam.quaternion();
        DVector::from_vec(vec![
            q.w,
            q.i,
            q.j,
            q.k,
            intrinsics.fx,
            intrinsics.fy,
            intrinsics.cx,
            intrinsics.cy,
        ])
    }

    /// Split a parameter vector into orientation and intrinsics.
    ///
    /// # Errors
    /// `ModelError::InvalidDimension` for a vector that is not 8 long, or
    /// `ModelError::InvalidParameters` for a zero quaternion.
    pub fn unpack_parameters(
        params: &DVector<f64>,
    ) -> ModelResult<(UnitQuaternion<f64>, PinholeIntrinsics)> {
        if params.len() != 8 {
            return Err(ModelError::InvalidDimension {
                context: "geocal parameters",
                expected: 8,
                actual: params.len(),
            }
            .log());
        }
        let q = Quaternion::new(params[0], params[1], params[2], params[3]);
        let q = UnitQuaternion::try_new(q, f64::EPSILON).ok_or_else(|| {
            ModelError::InvalidParameters("orientation quaternion has zero norm".to_string()).log()
        })?;
        Ok((q, Self::intrinsics(params)))
    }

    /// Catalogue position of the star that would be imaged at `(u, v)`; the inverse
    /// of the model, used to build synthetic cross-matches.
    pub fn back_project(
        q_sez_cam: &UnitQuaternion<f64>,
        intrinsics: &PinholeIntrinsics,
        u: f64,
        v: f64,
        gmst: f64,
        lon: f64,
        lat: f64,
    ) -> (f64, f64) {
        let r_cam = Vector3::new(
            (u - intrinsics.cx) / intrinsics.fx,
            (v - intrinsics.cy) / intrinsics.fy,
            1.0,
        );
        let r_eci = sez_to_eci(gmst, lon, lat) * q_sez_cam.transform_vector(&r_cam);
        unit_to_radec(&r_eci)
    }

    fn intrinsics(params: &DVector<f64>) -> PinholeIntrinsics {
        PinholeIntrinsics {
            fx: params[4],
            fy: params[5],
            cx: params[6],
            cy: params[7],
        }
    }
}

impl ResidualModel for GeoCalFitter {
    fn num_parameters(&self) -> usize {
        8
    }

    fn num_observations(&self) -> usize {
        2 * self.matches.len()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        let n = 2 * self.matches.len();
        let q = Quaternion::new(params[0], params[1], params[2], params[3]);
        let Some(q_sez_cam) = UnitQuaternion::try_new(q, f64::EPSILON) else {
            return DVector::from_element(n, f64::NAN);
        };
        let intrinsics = Self::intrinsics(params);
        DVector::from_iterator(
            n,
            self.r_sez.iter().flat_map(|r| {
                let (u, v) = intrinsics.project(&q_sez_cam.inverse_transform_vector(r));
                [u, v]
            }),
        )
    }

    fn jacobian(&self, params: &DVector<f64>) -> Option<DMatrix<f64>> {
        let n = 2 * self.matches.len();
        let q = Quaternion::new(params[0], params[1], params[2], params[3]);
        let norm = q.norm();
        let Some(q_sez_cam) = UnitQuaternion::try_new(q, f64::EPSILON) else {
            return Some(DMatrix::from_element(n, 8, f64::NAN));
        };
        let intrinsics = Self::intrinsics(params);

        let unit = q_sez_cam.quaternion();
        let w = unit.w;
        let v = unit.imag();
        let q_hat = Vector4::new(unit.w, unit.i, unit.j, unit.k);
        let normalisation = (Matrix4::identity() - q_hat * q_hat.transpose()) / norm;

        let mut jacobian = DMatrix::zeros(n, 8);
        for (i, r) in self.r_sez.iter().enumerate() {
            let (row_u, row_v) = (2 * i, 2 * i + 1);
            let r_cam = q_sez_cam.inverse_transform_vector(r);
            let (x, y, z) = (r_cam.x, r_cam.y, r_cam.z);
            if z <= 0.0 {
                jacobian.row_mut(row_u).fill(f64::NAN);
                jacobian.row_mut(row_v).fill(f64::NAN);
                continue;
            }

            let mut d_rotation = Matrix3x4::zeros();
            d_rotation.set_column(0, &(v.cross(r) * -2.0));
            let d_imag = r.cross_matrix() * (2.0 * w)
                + (Matrix3::identity() * v.dot(r) + v * r.transpose() - r * v.transpose() * 2.0)
                    * 2.0;
            d_rotation.fixed_view_mut::<3, 3>(0, 1).copy_from(&d_imag);

            let d_projection = Matrix2x3::new(
                intrinsics.fx / z,
                0.0,
                -intrinsics.fx * x / (z * z),
                0.0,
                intrinsics.fy / z,
                -intrinsics.fy * y / (z * z),
            );
            let d_quaternion = d_projection * d_rotation * normalisation;
            for j in 0..4 {
                jacobian[(row_u, j)] = d_quaternion[(0, j)];
                jacobian[(row_v, j)] = d_quaternion[(1, j)];
            }

            jacobian[(row_u, 4)] = x / z;
            jacobian[(row_u, 6)] = 1.0;
            jacobian[(row_v, 5)] = y / z;
            jacobian[(row_v, 7)] = 1.0;
        }
        Some(jacobian)
    }

    fn post_parameter_update(&self, params: &mut DVector<f64>) {
        let norm = params.rows(0, 4).norm();
        if norm > 0.0 && norm.is_finite() {
            params.rows_mut(0, 4).unscale_mut(norm);
        }
    }

    /// The quaternion itself; scaling it leaves every projection unchanged.
    fn gauge_directions(&self, params: &DVector<f64>) -> Option<DMatrix<f64>> {
        let norm = params.rows(0, 4).norm();
        if !(norm > 0.0 && norm.is_finite()) {
            return None;
        }
        Some(DMatrix::from_fn(8, 1, |i, _| {
            if i < 4 { params[i] / norm } else { 0.0 }
        }))
    }
}
