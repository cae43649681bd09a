use folio_core::{xterm_index, LinearGradient, Rgb};
use pretty_assertions::assert_eq;

#[test]
fn endpoints_render_exact_stop_colors() {
    let gradient = LinearGradient::traffic_light();
    assert_eq!(gradient.at(0.0), Rgb::new(192, 3, 20));
    assert_eq!(gradient.at(1.0), Rgb::new(3, 192, 20));
    assert_eq!(gradient.at(0.5), Rgb::new(255, 255, 0));
}

#[test]
fn interior_fractions_interpolate_between_bounding_stops() {
    let low = Rgb::new(0, 0, 0);
    let mid = Rgb::new(100, 200, 40);
    let high = Rgb::new(200, 0, 40);
    let gradient = LinearGradient::new(vec![low, mid, high]).unwrap();

    assert_eq!(gradient.at(0.25), Rgb::new(50, 100, 20));
    assert_eq!(gradient.at(0.75), Rgb::new(150, 100, 40));
}

#[test]
fn out_of_range_fractions_clamp() {
    let gradient = LinearGradient::traffic_light();
    assert_eq!(gradient.at(-3.0), gradient.at(0.0));
    assert_eq!(gradient.at(7.0), gradient.at(1.0));
}

#[test]
fn empty_gradient_is_rejected() {
    assert!(LinearGradient::new(Vec::new()).is_none());
}

#[test]
fn stop_colors_quantise_to_nearby_palette_entries() {
    let gradient = LinearGradient::traffic_light();
    // (192,3,20) sits next to the cube's (175,0,0).
    assert_eq!(xterm_index(gradient.at(0.0)), 124);
    assert_eq!(xterm_index(gradient.at(0.5)), 226);
}
