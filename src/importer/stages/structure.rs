//! Site, building and subnet translation.

use tracing::debug;

use crate::importer::context::{BuildingHandle, Context, IntermediateData};
use crate::importer::error::ImportError;
use crate::target::{Building, Site, Subnet, TargetEntity};

pub(crate) const SITE_NAME: &str = "Hochschulstraße";

pub fn add_site(
    _ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let site = Site {
        id: data.ids.mint(),
        name: SITE_NAME.to_string(),
    };
    data.set_site(site.id)?;
    Ok(vec![TargetEntity::Site(site)])
}

pub fn translate_buildings(
    ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let site = data.site()?;
    let mut objs = Vec::new();
    for building in &ctx.source.buildings {
        debug!(event = "building", short_name = %building.short_name);
        let new_building = Building {
            id: data.ids.mint(),
            site,
            short_name: building.short_name.clone(),
            street: building.street.clone(),
            number: building.number.clone(),
        };
        data.insert_building(
            &building.short_name,
            BuildingHandle {
                id: new_building.id,
                street: building.street.clone(),
                number: building.number.clone(),
                zip_code: building.zip_code.clone(),
            },
        )?;
        objs.push(TargetEntity::Building(new_building));
    }
    Ok(objs)
}

pub fn translate_subnets(
    ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let mut objs = Vec::new();
    for subnet in &ctx.source.subnets {
        let new_subnet = Subnet {
            id: data.ids.mint(),
            description: subnet.description.clone(),
            cidr: subnet.cidr.clone(),
            gateway: subnet.gateway.clone(),
            vlan_id: subnet.vlan_id,
        };
        data.insert_subnet(&subnet.cidr, new_subnet.id)?;
        objs.push(TargetEntity::Subnet(new_subnet));
    }
    Ok(objs)
}
