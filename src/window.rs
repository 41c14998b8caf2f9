//! Native window: live preview, door status, camera switch.

use eframe::egui::{
    self, pos2, Align, Align2, Color32, ColorImage, FontId, Layout, Rect, RichText,
    TextureHandle, TextureOptions, TopBottomPanel,
};
use smartdoor_vision::{CameraProvider, EngineFactory, LensFacing, PreviewImage};

use crate::binder::ViewBinder;
use crate::permission::Grant;
use crate::status::{Status, StatusCell};

pub const TITLE: &str = "Smart Door Opening System";
const PERMISSION_MESSAGE: &str = "Camera permission is required";

fn status_color(status: Status) -> Color32 {
    let [r, g, b] = status.rgb();
    Color32::from_rgb(r, g, b)
}

pub struct DoorWindow<P: CameraProvider, F: EngineFactory> {
    binder: ViewBinder<P, F>,
    status: StatusCell,
    grant: Grant,
    surface_ready: bool,
    texture: Option<TextureHandle>,
    shown: Option<u64>,
}

impl<P: CameraProvider, F: EngineFactory> DoorWindow<P, F> {
    pub fn new(binder: ViewBinder<P, F>, grant: Grant) -> Self {
        Self {
            binder,
            status: StatusCell::new(),
            grant,
            surface_ready: false,
            texture: None,
            shown: None,
        }
    }

    fn refresh_texture(&mut self, ctx: &egui::Context, preview: &PreviewImage) {
        if self.shown == Some(preview.sequence) && self.texture.is_some() {
            return;
        }
        let upright = preview.rotation.apply(&preview.image);
        let size = [upright.width() as usize, upright.height() as usize];
        let image = ColorImage::from_rgb(size, upright.as_raw());
        match self.texture.as_mut() {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                self.texture = Some(ctx.load_texture("camera-preview", image, TextureOptions::LINEAR))
            }
        }
        self.shown = Some(preview.sequence);
    }

    fn show_top_bar(&mut self, ctx: &egui::Context) {
        TopBottomPanel::top("door_top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading(RichText::new(TITLE).strong());
                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                    if ui.button("Switch Camera").clicked() {
                        self.binder.toggle();
                    }
                    ui.label(format!("{} camera", self.binder.facing()));
                });
            });
        });
    }

    fn show_preview(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let area = ui.max_rect();
            if self.grant == Grant::Denied {
                ui.centered_and_justified(|ui| {
                    ui.label(RichText::new(PERMISSION_MESSAGE).color(Color32::RED).size(20.0));
                });
                return;
            }

            match self.binder.preview() {
                Some(preview) => self.refresh_texture(ctx, &preview),
                None => {
                    self.texture = None;
                    self.shown = None;
                }
            }

            if let Some(texture) = &self.texture {
                let mut image = egui::Image::from_texture(texture)
                    .max_size(area.size())
                    .maintain_aspect_ratio(true);
                if self.binder.facing() == LensFacing::Front {
                    image = image.uv(Rect::from_min_max(pos2(1.0, 0.0), pos2(0.0, 1.0)));
                }
                ui.centered_and_justified(|ui| {
                    ui.add(image);
                });
            }

            let status = self.status.get();
            ui.painter().text(
                pos2(area.center().x, area.top() + 80.0),
                Align2::CENTER_TOP,
                status.label(),
                FontId::proportional(28.0),
                status_color(status),
            );
        });
    }
}

impl<P: CameraProvider, F: EngineFactory> eframe::App for DoorWindow<P, F> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.surface_ready {
            // first frame: the preview surface exists now
            self.surface_ready = true;
            self.binder.surface_ready(self.grant);
        }
        self.binder.pump(&mut self.status);

        self.show_top_bar(ctx);
        self.show_preview(ctx);
    }
}
