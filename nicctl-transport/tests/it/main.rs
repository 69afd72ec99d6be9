mod ctlq;
mod ring;
