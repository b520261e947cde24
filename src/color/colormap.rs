use ndarray::Array2;

const LUT_SIZE: usize = 256;

type Stop = (f64, [f64; 3]);

// evenly spaced samples of the matplotlib perceptual maps
const VIRIDIS: [[f64; 3]; 11] = [
    [0.267, 0.005, 0.329],
    [0.283, 0.141, 0.458],
    [0.254, 0.265, 0.530],
    [0.207, 0.372, 0.553],
    [0.164, 0.471, 0.558],
    [0.128, 0.567, 0.551],
    [0.135, 0.659, 0.518],
    [0.267, 0.749, 0.441],
    [0.478, 0.821, 0.318],
    [0.741, 0.873, 0.150],
    [0.993, 0.906, 0.144],
];
const PLASMA: [[f64; 3]; 11] = [
    [0.050, 0.030, 0.528],
    [0.255, 0.014, 0.615],
    [0.417, 0.001, 0.658],
    [0.563, 0.018, 0.650],
    [0.692, 0.165, 0.565],
    [0.798, 0.280, 0.470],
    [0.881, 0.393, 0.383],
    [0.949, 0.517, 0.295],
    [0.988, 0.652, 0.212],
    [0.988, 0.809, 0.145],
    [0.940, 0.975, 0.131],
];
const INFERNO: [[f64; 3]; 11] = [
    [0.001, 0.000, 0.014],
    [0.087, 0.045, 0.225],
    [0.258, 0.039, 0.406],
    [0.416, 0.090, 0.433],
    [0.578, 0.148, 0.404],
    [0.735, 0.216, 0.330],
    [0.865, 0.317, 0.226],
    [0.955, 0.458, 0.098],
    [0.988, 0.645, 0.040],
    [0.964, 0.843, 0.273],
    [0.988, 0.998, 0.645],
];
const MAGMA: [[f64; 3]; 11] = [
    [0.001, 0.000, 0.014],
    [0.080, 0.058, 0.236],
    [0.232, 0.060, 0.438],
    [0.390, 0.100, 0.502],
    [0.550, 0.161, 0.506],
    [0.716, 0.215, 0.475],
    [0.868, 0.288, 0.409],
    [0.967, 0.439, 0.360],
    [0.995, 0.624, 0.427],
    [0.995, 0.812, 0.572],
    [0.987, 0.991, 0.750],
];
const CIVIDIS: [[f64; 3]; 11] = [
    [0.000, 0.135, 0.304],
    [0.000, 0.196, 0.425],
    [0.240, 0.258, 0.427],
    [0.336, 0.320, 0.431],
    [0.418, 0.383, 0.452],
    [0.494, 0.446, 0.471],
    [0.580, 0.513, 0.473],
    [0.663, 0.581, 0.459],
    [0.759, 0.655, 0.424],
    [0.862, 0.734, 0.365],
    [0.995, 0.875, 0.226],
];
const GRAY: [Stop; 2] = [(0.0, [0.0, 0.0, 0.0]), (1.0, [1.0, 1.0, 1.0])];
const HOT: [Stop; 4] = [
    (0.0, [0.0416, 0.0, 0.0]),
    (0.365, [1.0, 0.0, 0.0]),
    (0.746, [1.0, 1.0, 0.0]),
    (1.0, [1.0, 1.0, 1.0]),
];
const COOL: [Stop; 2] = [(0.0, [0.0, 1.0, 1.0]), (1.0, [1.0, 0.0, 1.0])];
const JET: [Stop; 6] = [
    (0.0, [0.0, 0.0, 0.5]),
    (0.125, [0.0, 0.0, 1.0]),
    (0.375, [0.0, 1.0, 1.0]),
    (0.625, [1.0, 1.0, 0.0]),
    (0.875, [1.0, 0.0, 0.0]),
    (1.0, [0.5, 0.0, 0.0]),
];

const NAMES: [&str; 10] = [
    "viridis", "plasma", "inferno", "magma", "cividis", "gray", "grey", "hot", "cool", "jet",
];

pub fn colormap_names() -> Vec<&'static str> { NAMES.to_vec() }

fn even(samples: &[[f64; 3]]) -> Vec<Stop> {
    let last = (samples.len() - 1) as f64;
    samples.iter().enumerate().map(|(i, &rgb)| (i as f64 / last, rgb)).collect()
}

fn stops(name: &str) -> Option<Vec<Stop>> {
    Some(match name {
        "viridis" => even(&VIRIDIS),
        "plasma" => even(&PLASMA),
        "inferno" => even(&INFERNO),
        "magma" => even(&MAGMA),
        "cividis" => even(&CIVIDIS),
        "gray" | "grey" => GRAY.to_vec(),
        "hot" => HOT.to_vec(),
        "cool" => COOL.to_vec(),
        "jet" => JET.to_vec(),
        _ => return None,
    })
}

fn interpolate(stops: &[Stop], t: f64) -> [f64; 3] {
    let upper = stops.iter().position(|&(pos, _)| pos >= t).unwrap_or(stops.len() - 1);
    if upper == 0 {
        return stops[0].1;
    }
    let (p0, c0) = stops[upper - 1];
    let (p1, c1) = stops[upper];
    let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
    std::array::from_fn(|i| c0[i] + f * (c1[i] - c0[i]))
}

/// A 256×3 table of RGB values in `[0, 1]`, or `None` for an unknown name.
/// Names are case-insensitive; a `_r` suffix reverses the map.
pub fn named_colormap(name: &str) -> Option<Array2<f64>> {
    let name = name.to_lowercase();
    let (base, reversed) = match name.strip_suffix("_r") {
        Some(base) => (base, true),
        None => (name.as_str(), false),
    };
    let stops = stops(base)?;
    Some(Array2::from_shape_fn((LUT_SIZE, 3), |(i, c)| {
        let t = i as f64 / (LUT_SIZE - 1) as f64;
        interpolate(&stops, if reversed { 1.0 - t } else { t })[c].clamp(0.0, 1.0)
    }))
}
