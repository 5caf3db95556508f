//! Preview rendering configuration.

/// Headless preview configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Target width (pixels)
    pub width: u32,

    /// Target height (pixels)
    pub height: u32,

    /// Field of view (degrees)
    pub fov_degrees: f32,

    /// Near clipping plane (meters)
    pub near_plane_m: f32,

    /// Far clipping plane (meters)
    pub far_plane_m: f32,

    /// Camera elevation above the patch origin (meters)
    pub camera_height_m: f32,

    /// Direction the light travels towards (normalized in the shader)
    pub light_direction: [f32; 3],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fov_degrees: 60.0,
            near_plane_m: 0.1,
            far_plane_m: 3000.0,
            camera_height_m: 120.0,
            light_direction: [-0.4, -1.0, -0.3],
        }
    }
}

impl RenderConfig {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}
